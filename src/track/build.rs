//! Folds the atoms of a `trak` into a `Track` and its `SampleTable`.
//!
//! Sample derivation:
//! - `stsz`: size per sample
//! - `stco`/`co64` + `stsc`: chunk offsets and samples per chunk,
//!   samples are contiguous within a chunk
//! - `stts` (+ `ctts`): decode time (+ composition offset)
//! - `stss`: keyframes, all samples are sync samples if absent

use log::{debug, warn};

use crate::{
    atom::ContainerAtom,
    atom_types::{Co64, Ctts, Hdlr, Mdhd, Mvhd, Stco, Stsc, Stsd, Stss, Stsz, Stts, Tkhd},
    atom_types::stsd::AudioSpecificConfig,
    support::{scale_large_timestamp, try_vec_with_capacity},
    FourCC,
    Mp4Error,
};

use super::{
    format::mime_type_for_format,
    mime_types,
    MediaFormat,
    SampleFlags,
    SampleTable,
    Track,
    TrackEncryptionBox,
    TrackKind,
};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Derives a track from `moov/trak`.
/// Returns `None` for tracks with an unrecognized handler.
pub(crate) fn parse_trak(trak: &ContainerAtom, mvhd: &Mvhd) -> Result<Option<Track>, Mp4Error> {
    let mdia = trak.require_container(FourCC::Mdia)?;
    let hdlr = mdia.require_leaf(FourCC::Hdlr)?.read::<Hdlr>()?;
    let Some(kind) = TrackKind::from_component(hdlr.media_type()) else {
        debug!("Skipping track with handler '{}'", hdlr.component_sub_type());
        return Ok(None)
    };

    let tkhd = trak.require_leaf(FourCC::Tkhd)?.read::<Tkhd>()?;
    let mdhd = mdia.require_leaf(FourCC::Mdhd)?.read::<Mdhd>()?;

    // All ones means "unknown" for both 32- and 64-bit durations
    let duration_us = match tkhd.duration() {
        0 | 0xFFFF_FFFF | u64::MAX => None,
        d if mvhd.time_scale() > 0 => Some(scale_large_timestamp(d as i64, MICROS_PER_SECOND, mvhd.time_scale() as i64)),
        _ => None,
    }.or_else(|| match mdhd.duration_unscaled() {
        0 => None,
        _ if mdhd.time_scale() == 0 => None,
        d => Some(scale_large_timestamp(d as i64, MICROS_PER_SECOND, mdhd.time_scale() as i64)),
    });

    let stbl = mdia.require_container(FourCC::Minf)?
        .require_container(FourCC::Stbl)?;
    let stsd = Stsd::parse(stbl.require_leaf(FourCC::Stsd)?.data())?;

    let encryption_boxes = stsd.entries().iter()
        .map(|entry| {
            let tenc = entry.protection()?.tenc()?;
            Some(TrackEncryptionBox {
                is_encrypted: tenc.is_protected(),
                iv_size: tenc.iv_size(),
                key_id: tenc.key_id(),
            })
        })
        .collect();

    let mut nal_length_size = None;
    let format = match stsd.entries().first() {
        Some(entry) => {
            let mime_type = entry.esds()
                .and_then(|e| e.mime_type())
                .or_else(|| mime_type_for_format(entry.original_format()))
                .unwrap_or(mime_types::APPLICATION_UNKNOWN);

            if let Some(video) = entry.video() {
                let mut init = Vec::new();
                if let Some(avcc) = entry.avcc() {
                    nal_length_size = Some(avcc.nal_length_size());
                    init = avcc.initialization_data();
                } else if let Some(info) = entry.esds().and_then(|e| e.decoder_specific_info()) {
                    init.push(info.to_vec());
                }
                MediaFormat::video(
                    mime_type,
                    duration_us,
                    video.width() as u32,
                    video.height() as u32,
                    tkhd.rotation_degrees(),
                    init,
                )
            } else if let Some(audio) = entry.audio() {
                let mut channel_count = audio.channel_count();
                let mut sample_rate = audio.sample_rate();
                let mut init = Vec::new();
                if let Some(info) = entry.esds().and_then(|e| e.decoder_specific_info()) {
                    if mime_type == mime_types::AUDIO_AAC {
                        if let Some(asc) = AudioSpecificConfig::parse(info) {
                            channel_count = asc.channel_count;
                            sample_rate = asc.sample_rate;
                        }
                    }
                    init.push(info.to_vec());
                }
                MediaFormat::audio(mime_type, duration_us, channel_count, sample_rate, init)
            } else {
                MediaFormat {
                    mime_type: mime_type.to_owned(),
                    duration_us,
                    ..MediaFormat::default()
                }
            }
        },
        None => {
            warn!("Track {} has no sample description", tkhd.track_id());
            MediaFormat {
                mime_type: mime_types::APPLICATION_UNKNOWN.to_owned(),
                duration_us,
                ..MediaFormat::default()
            }
        }
    }.with_language(mdhd.language());

    Ok(Some(Track {
        id: tkhd.track_id(),
        kind,
        timescale: mdhd.time_scale(),
        duration_us,
        format,
        encryption_boxes,
        nal_length_size,
        creation_time: tkhd.creation_time(),
    }))
}

/// Builds the sample table from `moov/trak/mdia/minf/stbl`.
pub(crate) fn parse_stbl(track: &Track, stbl: &ContainerAtom) -> Result<SampleTable, Mp4Error> {
    let stsz = stbl.require_leaf(FourCC::Stsz)?.read::<Stsz>()?;
    let chunk_offsets = match (stbl.leaf(FourCC::Stco), stbl.leaf(FourCC::Co64)) {
        (Some(stco), _) => Co64::from(stco.read::<Stco>()?),
        (None, Some(co64)) => co64.read::<Co64>()?,
        (None, None) => return Err(Mp4Error::NoSuchAtom(format!("{}/stco", stbl.name()))),
    };
    let stsc = stbl.require_leaf(FourCC::Stsc)?.read::<Stsc>()?;
    let stts = stbl.require_leaf(FourCC::Stts)?.read::<Stts>()?;
    let ctts = stbl.leaf(FourCC::Ctts)
        .map(|l| l.read::<Ctts>())
        .transpose()?;
    let stss = stbl.leaf(FourCC::Stss)
        .map(|l| l.read::<Stss>())
        .transpose()?;

    // Counts are checked against each other before anything is expanded
    let sample_count = stsz.len();
    let chunks = stsc.chunks(chunk_offsets.len());
    let chunk_capacity: u64 = chunks.iter().map(|(n, _)| *n as u64).sum();
    if chunk_capacity < sample_count as u64 {
        return Err(Mp4Error::InvalidSampleTable(format!(
            "track {}: chunks hold {chunk_capacity} samples, stsz lists {sample_count}",
            track.id()
        )))
    }
    if stts.sample_total() < sample_count as u64 {
        return Err(Mp4Error::InvalidSampleTable(format!(
            "track {}: stts covers {} samples, stsz lists {sample_count}",
            track.id(), stts.sample_total()
        )))
    }
    if let Some(ctts) = ctts.as_ref().filter(|c| c.sample_total() < sample_count as u64) {
        return Err(Mp4Error::InvalidSampleTable(format!(
            "track {}: ctts covers {} samples, stsz lists {sample_count}",
            track.id(), ctts.sample_total()
        )))
    }

    let sizes = stsz.sizes()?;

    // Offsets and sample description per sample, chunk by chunk
    let mut offsets = try_vec_with_capacity(sample_count, "sample offset")?;
    let mut descriptions = try_vec_with_capacity(sample_count, "sample description")?;
    'chunks: for ((samples_in_chunk, description), chunk_offset) in chunks.iter().zip(chunk_offsets.offsets()) {
        let mut offset = *chunk_offset;
        for _ in 0 .. *samples_in_chunk {
            if offsets.len() == sample_count {
                break 'chunks
            }
            offsets.push(offset);
            descriptions.push(*description);
            offset += sizes[offsets.len() - 1] as u64;
        }
    }

    let decode_times = stts.decode_times(sample_count)?;
    let composition_offsets = match &ctts {
        Some(ctts) => ctts.offsets(sample_count)?,
        None => {
            let mut offsets = try_vec_with_capacity(sample_count, "composition offset")?;
            offsets.resize(sample_count, 0);
            offsets
        },
    };

    let timescale = track.timescale() as i64;
    if timescale == 0 {
        return Err(Mp4Error::InvalidSampleTable(format!("track {}: zero time scale", track.id())))
    }
    let timestamps_us = decode_times.iter()
        .zip(composition_offsets.iter())
        .take(sample_count)
        .map(|(dts, cts)| scale_large_timestamp(*dts as i64 + cts, MICROS_PER_SECOND, timescale))
        .collect();

    let mut sync = try_vec_with_capacity(sample_count, "sync flag")?;
    sync.resize(sample_count, stss.is_none());
    if let Some(stss) = &stss {
        for number in stss.sync_samples() {
            // 1-based sample numbers, out of range entries are ignored
            if let Some(s) = (*number as usize).checked_sub(1).and_then(|i| sync.get_mut(i)) {
                *s = true;
            }
        }
    }

    let flags = sync.iter()
        .zip(descriptions.iter())
        .map(|(is_sync, description)| {
            let mut flags = SampleFlags::NONE;
            if *is_sync {
                flags |= SampleFlags::SYNC;
            }
            if track.encryption_box(*description).is_some_and(|e| e.is_encrypted) {
                flags |= SampleFlags::ENCRYPTED;
            }
            flags
        })
        .collect();

    SampleTable::with_descriptions(offsets, sizes, timestamps_us, flags, descriptions)
}
