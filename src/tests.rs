//! End-to-end tests over small MP4 files built in memory.
//!
//! Files are laid out as `ftyp`, `mdat`, `moov`, with samples
//! placed at explicit offsets inside `mdat`.

use std::{
    io::ErrorKind,
    sync::Arc,
    thread,
    time::Duration,
};

use parking_lot::Mutex;
use proptest::prelude::*;

use crate::{
    input::{BufferedInput, ByteSource, DataSpec, MemorySource},
    loader::{Loadable, LoadMode, LoadOutcome, Loader, SharedSource},
    output::{ExtractorOutput, TrackOutput},
    parser::{AtomParser, ParseResult},
    track::mime_types,
    AllocatorPool,
    Mp4Error,
    ReadResult,
    SampleFlags,
    SampleHolder,
    SeekMode,
    Source,
    SourceConfig,
    TrackEncryptionBox,
    TrackKind,
};

const MDAT_DATA_START: u64 = 28;

#[derive(Debug, Clone)]
enum Codec {
    /// `avc1` with the given NAL length prefix size.
    Avc(u8),
    /// `mp4a`, samples are passed through unchanged.
    Aac,
    /// `encv` wrapping `avc1` with 4 byte NAL length prefixes,
    /// `cenc` protected under the given key id.
    EncryptedAvc([u8; 16]),
}

#[derive(Debug, Clone)]
struct TestSample {
    offset: u64,
    data: Vec<u8>,
    /// In track time scale units.
    duration: u32,
    sync: bool,
}

#[derive(Debug, Clone)]
struct TestTrack {
    id: u32,
    codec: Codec,
    timescale: u32,
    samples: Vec<TestSample>,
}

fn atom(name: &[u8; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = ((payload.len() + 8) as u32).to_be_bytes().to_vec();
    out.extend_from_slice(name);
    out.extend_from_slice(payload);
    out
}

fn container(name: &[u8; 4], children: &[Vec<u8>]) -> Vec<u8> {
    atom(name, &children.concat())
}

/// Version 0 and zero flags, followed by `body`.
fn full_atom(name: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut payload = vec![0_u8; 4];
    payload.extend_from_slice(body);
    atom(name, &payload)
}

fn be32(values: &[u32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_be_bytes()).collect()
}

fn mvhd() -> Vec<u8> {
    // creation, modification, time scale 1000, duration 100
    let mut body = be32(&[0, 0, 1000, 100]);
    body.resize(96, 0);
    full_atom(b"mvhd", &body)
}

fn tkhd(track_id: u32) -> Vec<u8> {
    let mut body = be32(&[0, 0, track_id, 0, 100]);
    body.extend_from_slice(&[0; 8]);
    body.extend_from_slice(&[0; 8]); // layer, group, volume, reserved
    body.extend(be32(&[0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000]));
    body.extend(be32(&[320 << 16, 240 << 16]));
    full_atom(b"tkhd", &body)
}

fn mdhd(timescale: u32, duration: u32) -> Vec<u8> {
    let mut body = be32(&[0, 0, timescale, duration]);
    // "und", quality
    body.extend_from_slice(&[0x55, 0xc4, 0, 0]);
    full_atom(b"mdhd", &body)
}

fn hdlr(sub_type: &[u8; 4]) -> Vec<u8> {
    let mut body = b"mhlr".to_vec();
    body.extend_from_slice(sub_type);
    body.extend_from_slice(&[0; 13]);
    full_atom(b"hdlr", &body)
}

fn sample_entry(codec: &Codec) -> Vec<u8> {
    // reserved, data reference index
    let mut payload = vec![0, 0, 0, 0, 0, 0, 0, 1];
    match codec {
        Codec::Avc(nal_length_size) => {
            payload.extend(visual_fields(*nal_length_size));
            atom(b"avc1", &payload)
        },
        Codec::EncryptedAvc(key_id) => {
            payload.extend(visual_fields(4));
            // version, flags, reserved, protected, 8 byte IVs
            let mut tenc = vec![0, 0, 0, 0, 0, 0, 1, 8];
            tenc.extend_from_slice(key_id);
            payload.extend(container(b"sinf", &[
                atom(b"frma", b"avc1"),
                full_atom(b"schm", b"cenc\0\x01\0\0"),
                container(b"schi", &[atom(b"tenc", &tenc)]),
            ]));
            atom(b"encv", &payload)
        },
        Codec::Aac => {
            payload.extend_from_slice(&[0; 8]);
            payload.extend_from_slice(&2_u16.to_be_bytes());
            payload.extend_from_slice(&16_u16.to_be_bytes());
            payload.extend_from_slice(&[0; 4]);
            payload.extend(be32(&[44_100 << 16]));
            atom(b"mp4a", &payload)
        },
    }
}

/// Visual sample entry fields and `avcC`, following the data reference index.
fn visual_fields(nal_length_size: u8) -> Vec<u8> {
    let mut fields = vec![0; 16];
    fields.extend_from_slice(&320_u16.to_be_bytes());
    fields.extend_from_slice(&240_u16.to_be_bytes());
    fields.extend(be32(&[0x0048_0000, 0x0048_0000, 0]));
    fields.extend_from_slice(&1_u16.to_be_bytes());
    fields.extend_from_slice(&[0; 32]);
    fields.extend_from_slice(&[0x00, 0x18, 0xff, 0xff]);
    let avcc = [
        1, 0x64, 0, 0x1f, 0xfc | (nal_length_size - 1),
        0xe1, 0, 2, 0x67, 0x64,
        1, 0, 1, 0x68,
    ];
    fields.extend(atom(b"avcC", &avcc));
    fields
}

/// One chunk per sample.
fn stbl(track: &TestTrack) -> Vec<u8> {
    let count = track.samples.len() as u32;

    let mut stsd = be32(&[1]);
    stsd.extend(sample_entry(&track.codec));

    let mut stts = be32(&[count]);
    for s in track.samples.iter() {
        stts.extend(be32(&[1, s.duration]));
    }

    let sync: Vec<u32> = track.samples.iter()
        .enumerate()
        .filter(|(_, s)| s.sync)
        .map(|(i, _)| i as u32 + 1)
        .collect();
    let mut stss = be32(&[sync.len() as u32]);
    stss.extend(be32(&sync));

    let mut stsz = be32(&[0, count]);
    stsz.extend(be32(&track.samples.iter().map(|s| s.data.len() as u32).collect::<Vec<_>>()));

    let mut stco = be32(&[count]);
    stco.extend(be32(&track.samples.iter().map(|s| s.offset as u32).collect::<Vec<_>>()));

    container(b"stbl", &[
        full_atom(b"stsd", &stsd),
        full_atom(b"stts", &stts),
        full_atom(b"stss", &stss),
        full_atom(b"stsc", &be32(&[1, 1, 1, 1])),
        full_atom(b"stsz", &stsz),
        full_atom(b"stco", &stco),
    ])
}

fn trak(track: &TestTrack) -> Vec<u8> {
    let handler = match track.codec {
        Codec::Avc(_) | Codec::EncryptedAvc(_) => b"vide",
        Codec::Aac => b"soun",
    };
    let duration = track.samples.iter().map(|s| s.duration).sum();
    container(b"trak", &[
        tkhd(track.id),
        container(b"mdia", &[
            mdhd(track.timescale, duration),
            hdlr(handler),
            container(b"minf", &[stbl(track)]),
        ]),
    ])
}

fn mp4(tracks: &[TestTrack]) -> Vec<u8> {
    let mut data = atom(b"ftyp", b"isom\0\0\x02\0isom");
    assert_eq!(data.len() as u64 + 8, MDAT_DATA_START);

    let end = tracks.iter()
        .flat_map(|t| t.samples.iter())
        .map(|s| s.offset as usize + s.data.len())
        .max()
        .unwrap_or(MDAT_DATA_START as usize);
    let mut mdat = vec![0_u8; end - MDAT_DATA_START as usize];
    for sample in tracks.iter().flat_map(|t| t.samples.iter()) {
        let start = (sample.offset - MDAT_DATA_START) as usize;
        mdat[start .. start + sample.data.len()].copy_from_slice(&sample.data);
    }
    data.extend(atom(b"mdat", &mdat));

    let mut moov = vec![mvhd()];
    moov.extend(tracks.iter().map(trak));
    data.extend(container(b"moov", &moov));
    data
}

/// NAL unit with a 4 byte length prefix, filled with `fill`.
fn nal_sample(len: usize, fill: u8) -> Vec<u8> {
    let mut data = ((len - 4) as u32).to_be_bytes().to_vec();
    data.resize(len, fill);
    data
}

/// Video track with samples @ 100, 300, 600, sync, non-sync, sync, 33ms apart.
fn three_sample_video() -> TestTrack {
    TestTrack {
        id: 1,
        codec: Codec::Avc(4),
        timescale: 30_000,
        samples: [(100, 50, true), (300, 80, false), (600, 40, true)].iter()
            .enumerate()
            .map(|(i, (offset, len, sync))| TestSample {
                offset: *offset,
                data: nal_sample(*len, i as u8 + 1),
                duration: 990,
                sync: *sync,
            })
            .collect(),
    }
}

/// Audio track with `count` samples of `len` bytes, back to back from `start`.
fn audio_track(id: u32, start: u64, count: usize, len: usize) -> TestTrack {
    TestTrack {
        id,
        codec: Codec::Aac,
        timescale: 44_100,
        samples: (0 .. count)
            .map(|i| TestSample {
                offset: start + (i * len) as u64,
                data: (0 .. len).map(|b| (b + i * 7) as u8).collect(),
                duration: 1024,
                sync: true,
            })
            .collect(),
    }
}

fn prepared(data: Vec<u8>, config: SourceConfig) -> Source {
    let mut source = Source::from_memory(data, config);
    source.prepare(0).unwrap();
    source
}

/// Reads until end of stream, waiting on a background loader if needed.
fn read_all(source: &mut Source) -> Vec<SampleHolder> {
    let mut samples = Vec::new();
    for _ in 0 .. 10_000 {
        let mut holder = SampleHolder::new();
        match source.read_sample(&mut holder).unwrap() {
            ReadResult::Sample(_) => samples.push(holder),
            ReadResult::SampleNotFound => thread::sleep(Duration::from_millis(1)),
            ReadResult::EndOfStream => return samples,
        }
    }
    panic!("no end of stream after {} samples", samples.len())
}

fn read_one(source: &mut Source) -> SampleHolder {
    let mut holder = SampleHolder::new();
    for _ in 0 .. 10_000 {
        match source.read_sample(&mut holder).unwrap() {
            ReadResult::Sample(_) => return holder,
            ReadResult::SampleNotFound => thread::sleep(Duration::from_millis(1)),
            ReadResult::EndOfStream => panic!("unexpected end of stream"),
        }
    }
    panic!("no sample")
}

#[test]
fn builds_sample_table_from_moov() {
    let source = prepared(mp4(&[three_sample_video()]), SourceConfig::default());
    assert_eq!(source.track_count(), 1);

    let (track, table) = source.track(0).unwrap();
    assert_eq!(track.kind(), TrackKind::Video);
    assert_eq!(track.nal_length_size(), Some(4));
    assert_eq!(table.offsets(), &[100, 300, 600]);
    assert_eq!(table.sizes(), &[50, 80, 40]);
    assert_eq!(table.timestamps_us(), &[0, 33_000, 66_000]);
    assert_eq!(table.flags(), &[SampleFlags::SYNC, SampleFlags::NONE, SampleFlags::SYNC]);

    let format = source.track_format(0).unwrap();
    assert_eq!(format.mime_type, mime_types::VIDEO_H264);
    assert_eq!(format.width, Some(320));
    assert_eq!(format.height, Some(240));
    assert_eq!(format.max_input_size, Some(80));
    assert_eq!(format.duration_us, Some(100_000));
    assert_eq!(format.initialization_data.len(), 2);
}

#[test]
fn reads_samples_in_order_with_start_codes() {
    let mut source = prepared(mp4(&[three_sample_video()]), SourceConfig::default());
    source.select_track(0).unwrap();

    let samples = read_all(&mut source);
    let times: Vec<i64> = samples.iter().map(|s| s.time_us).collect();
    assert_eq!(times, vec![0, 33_000, 66_000]);
    assert!(samples[0].is_sync());
    assert!(!samples[1].is_sync());

    // 4 byte prefixes become start codes of the same length
    let first = samples[0].bytes();
    assert_eq!(first.len(), 50);
    assert_eq!(&first[.. 4], &[0, 0, 0, 1]);
    assert!(first[4 ..].iter().all(|b| *b == 1));

    assert_eq!(source.buffered_position_us(), Some(100_000));
}

#[test]
fn rewrites_short_nal_length_prefixes() {
    let mut track = three_sample_video();
    track.codec = Codec::Avc(2);
    track.samples.truncate(1);
    track.samples[0].data = vec![0, 3, 0xa, 0xb, 0xc, 0, 2, 0xd, 0xe];

    let mut source = prepared(mp4(&[track]), SourceConfig::default());
    source.select_track(0).unwrap();
    let mut holder = SampleHolder::new();
    assert_eq!(source.read_sample(&mut holder).unwrap(), ReadResult::Sample(13));
    assert_eq!(holder.bytes(), &[0, 0, 0, 1, 0xa, 0xb, 0xc, 0, 0, 0, 1, 0xd, 0xe]);
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn every_length_prefix_becomes_a_start_code(
        nal_length_size in 1_u8 ..= 4,
        units in prop::collection::vec(prop::collection::vec(any::<u8>(), 0 .. 40), 1 .. 5),
    ) {
        let mut data = Vec::new();
        let mut expected = Vec::new();
        for unit in units.iter() {
            let prefix = (unit.len() as u32).to_be_bytes();
            data.extend_from_slice(&prefix[4 - nal_length_size as usize ..]);
            data.extend_from_slice(unit);
            expected.extend_from_slice(&[0, 0, 0, 1]);
            expected.extend_from_slice(unit);
        }
        let mut track = three_sample_video();
        track.codec = Codec::Avc(nal_length_size);
        track.samples.truncate(1);
        track.samples[0].data = data;

        let mut source = prepared(mp4(&[track]), SourceConfig::default());
        source.select_track(0).unwrap();
        let mut holder = SampleHolder::new();
        prop_assert_eq!(source.read_sample(&mut holder).unwrap(), ReadResult::Sample(expected.len()));
        prop_assert_eq!(holder.bytes(), expected.as_slice());
    }
}

#[test]
fn nal_unit_overrunning_sample_fails() {
    let mut track = three_sample_video();
    track.samples.truncate(1);
    track.samples[0].data = nal_sample(50, 1);
    track.samples[0].data[3] = 200;

    let mut source = prepared(mp4(&[track]), SourceConfig::default().with_max_load_retries(0));
    source.select_track(0).unwrap();
    let mut holder = SampleHolder::new();
    assert!(matches!(source.read_sample(&mut holder), Err(Mp4Error::InvalidSampleTable(_))));
}

#[test]
fn encrypted_samples_carry_key_id() {
    let key_id = *b"0123456789abcdef";
    let mut track = three_sample_video();
    track.codec = Codec::EncryptedAvc(key_id);
    let mut source = prepared(mp4(&[track]), SourceConfig::default());

    let (track, table) = source.track(0).unwrap();
    assert_eq!(track.kind(), TrackKind::Video);
    assert_eq!(track.nal_length_size(), Some(4));
    assert_eq!(
        track.encryption_box(1),
        Some(&TrackEncryptionBox {is_encrypted: true, iv_size: 8, key_id})
    );
    let encrypted_sync = SampleFlags::SYNC | SampleFlags::ENCRYPTED;
    assert_eq!(table.flags(), &[encrypted_sync, SampleFlags::ENCRYPTED, encrypted_sync]);
    // mime type of the unencrypted format
    assert_eq!(source.track_format(0).unwrap().mime_type, mime_types::VIDEO_H264);

    source.select_track(0).unwrap();
    let samples = read_all(&mut source);
    assert_eq!(samples.len(), 3);
    assert!(samples.iter().all(|s| s.is_encrypted() && s.key_id == Some(key_id)));
    assert_eq!(samples.iter().map(|s| s.is_sync()).collect::<Vec<_>>(), vec![true, false, true]);
}

#[test]
fn oversized_sample_count_fails_prepare() {
    let mut data = mp4(&[three_sample_video()]);
    let stsz = data.windows(4).position(|w| w == b"stsz").unwrap();
    // constant size 4 for 0x4000_0000 samples, the other tables list 3
    data[stsz + 8 .. stsz + 16].copy_from_slice(&[0, 0, 0, 4, 0x40, 0, 0, 0]);
    let mut source = Source::from_memory(data, SourceConfig::default());
    assert!(matches!(source.prepare(0), Err(Mp4Error::InvalidSampleTable(_))));
    assert!(!source.is_prepared());
}

#[test]
fn bytes_survive_small_blocks() {
    let track = audio_track(1, 40, 5, 37);
    let expected: Vec<Vec<u8>> = track.samples.iter().map(|s| s.data.clone()).collect();
    let config = SourceConfig::default().with_block_size(16);
    let mut source = prepared(mp4(&[track]), config);
    source.select_track(0).unwrap();

    let samples = read_all(&mut source);
    let read: Vec<Vec<u8>> = samples.iter().map(|s| s.bytes().to_vec()).collect();
    assert_eq!(read, expected);
    // a drained output holds no blocks
    assert_eq!(source.pool().allocated_count(), 0);
}

#[test]
fn single_block_limit_streams_every_sample() {
    let track = audio_track(1, 32, 10, 10);
    let expected: Vec<Vec<u8>> = track.samples.iter().map(|s| s.data.clone()).collect();
    let config = SourceConfig::default()
        .with_block_size(64)
        .with_buffer_limit_blocks(1);
    let mut source = prepared(mp4(&[track]), config);
    source.select_track(0).unwrap();

    let samples = read_all(&mut source);
    let read: Vec<Vec<u8>> = samples.iter().map(|s| s.bytes().to_vec()).collect();
    assert_eq!(read, expected);
    assert_eq!(source.pool().allocated_count(), 0);
}

#[test]
fn steps_over_unselected_tracks() {
    let video = three_sample_video();
    let audio = audio_track(2, 700, 4, 20);
    let mut source = prepared(mp4(&[video, audio]), SourceConfig::default());
    assert_eq!(source.track_count(), 2);
    let audio_index = source.track_index_of(TrackKind::Audio).unwrap();
    assert_eq!(source.track_format(audio_index).unwrap().mime_type, mime_types::AUDIO_AAC);
    assert_eq!(source.track_format(audio_index).unwrap().sample_rate, Some(44_100));

    source.select_track(audio_index).unwrap();
    let samples = read_all(&mut source);
    assert_eq!(samples.len(), 4);
    assert!(samples.iter().all(|s| s.size == 20));
}

#[test]
fn reading_requires_prepare_and_selection() {
    let mut source = Source::from_memory(mp4(&[three_sample_video()]), SourceConfig::default());
    let mut holder = SampleHolder::new();
    assert!(matches!(source.read_sample(&mut holder), Err(Mp4Error::NotPrepared)));
    source.prepare(0).unwrap();
    assert!(matches!(source.read_sample(&mut holder), Err(Mp4Error::NoTrackSelected)));
    assert!(matches!(source.select_track(3), Err(Mp4Error::NoSuchTrack(3))));
}

#[test]
fn missing_moov_fails_prepare() {
    let data = atom(b"ftyp", b"isom\0\0\x02\0isom");
    let mut source = Source::from_memory(data, SourceConfig::default());
    assert!(matches!(source.prepare(0), Err(Mp4Error::MissingMovie)));
    assert!(!source.is_prepared());
}

#[test]
fn sample_info_is_cleared_on_advance() {
    let mut source = prepared(mp4(&[three_sample_video()]), SourceConfig::default());
    source.select_track(0).unwrap();
    assert_eq!(source.sample_time(), None);

    read_one(&mut source);
    assert_eq!(source.sample_time(), Some(0));
    assert_eq!(source.sample_flags(), Some(SampleFlags::SYNC));
    source.advance();
    assert_eq!(source.sample_time(), None);
    assert_eq!(source.sample_flags(), None);
}

#[test]
fn seek_modes() {
    let mut source = prepared(mp4(&[three_sample_video()]), SourceConfig::default());
    source.select_track(0).unwrap();

    source.seek_to(40_000, SeekMode::PreviousSync).unwrap();
    assert_eq!(read_one(&mut source).time_us, 0);

    source.seek_to(40_000, SeekMode::NextSync).unwrap();
    assert_eq!(read_one(&mut source).time_us, 66_000);

    // no keyframe after, falls back to the one before
    source.seek_to(70_000, SeekMode::NextSync).unwrap();
    assert_eq!(read_one(&mut source).time_us, 66_000);
}

#[test]
fn first_sample_after_seek_is_a_keyframe() {
    let mut source = prepared(mp4(&[three_sample_video()]), SourceConfig::default());
    source.select_track(0).unwrap();

    // loading starts at the non-sync sample @ 33ms
    source.seek_to(20_000, SeekMode::NextClosest).unwrap();
    let holder = read_one(&mut source);
    assert_eq!(holder.time_us, 66_000);
    assert!(holder.is_sync());
}

#[test]
fn seeks_within_buffered_samples() {
    let mut source = prepared(mp4(&[three_sample_video()]), SourceConfig::default());
    source.select_track(0).unwrap();
    assert_eq!(read_one(&mut source).time_us, 0);

    source.seek_to(66_000, SeekMode::PreviousSync).unwrap();
    assert_eq!(source.sample_time(), None);
    assert_eq!(read_one(&mut source).time_us, 66_000);
    let mut holder = SampleHolder::new();
    assert_eq!(source.read_sample(&mut holder).unwrap(), ReadResult::EndOfStream);
}

#[test]
fn release_frees_everything() {
    let mut source = prepared(mp4(&[three_sample_video()]), SourceConfig::default());
    source.select_track(0).unwrap();
    read_one(&mut source);
    assert!(source.pool().allocated_count() > 0);

    source.release();
    assert!(!source.is_prepared());
    assert_eq!(source.track_count(), 0);
    assert_eq!(source.selected_track(), None);
    assert_eq!(source.pool().allocated_count(), 0);
    assert_eq!(source.pool().recycled_count(), 0);

    // prepare works again after release
    source.prepare(0).unwrap();
    source.select_track(0).unwrap();
    assert_eq!(read_all(&mut source).len(), 3);
}

#[test]
fn background_loading_respects_buffer_limit() {
    let track = audio_track(1, 32, 6, 64);
    let expected: Vec<Vec<u8>> = track.samples.iter().map(|s| s.data.clone()).collect();
    let config = SourceConfig::default()
        .with_block_size(64)
        .with_buffer_limit_blocks(2);
    let mut source = prepared(mp4(&[track]), config);
    source.select_track(0).unwrap();

    let samples = read_all(&mut source);
    let read: Vec<Vec<u8>> = samples.iter().map(|s| s.bytes().to_vec()).collect();
    assert_eq!(read, expected);
    assert!(source.pool().allocated_count() <= 2);
}

#[test]
fn loading_all_tracks_drops_unselected_samples() {
    // all of track 0 lies before track 1
    let first = audio_track(1, 32, 8, 64);
    let second = audio_track(2, 32 + 8 * 64, 8, 64);
    let expected: Vec<Vec<u8>> = second.samples.iter().map(|s| s.data.clone()).collect();
    let config = SourceConfig::default()
        .with_block_size(64)
        .with_buffer_limit_blocks(2)
        .with_load_all_tracks(true);
    let mut source = prepared(mp4(&[first, second]), config);
    source.select_track(1).unwrap();

    let samples = read_all(&mut source);
    let read: Vec<Vec<u8>> = samples.iter().map(|s| s.bytes().to_vec()).collect();
    assert_eq!(read, expected);
    assert!(samples.windows(2).all(|w| w[0].time_us < w[1].time_us));
    assert!(source.pool().allocated_count() <= 2);
}

#[test]
fn deselect_stops_loading() {
    let config = SourceConfig::default()
        .with_block_size(64)
        .with_buffer_limit_blocks(2);
    let mut source = prepared(mp4(&[audio_track(1, 32, 6, 64)]), config);
    source.select_track(0).unwrap();
    read_one(&mut source);

    source.deselect_track(0);
    assert!(!source.is_loading());
    assert_eq!(source.selected_track(), None);
    assert_eq!(source.pool().allocated_count(), 0);
}

/// Memory source failing with an I/O error the `fail_on`th time
/// a read starts at one of `fail_at`. Reads are cut short at each of them.
struct FlakySource {
    inner: MemorySource,
    position: u64,
    fail_at: Vec<u64>,
    fail_on: usize,
    /// Reads started at each of `fail_at`.
    hits: Arc<Mutex<Vec<usize>>>,
}

impl FlakySource {
    fn new(data: Vec<u8>, fail_at: &[u64], fail_on: usize) -> Self {
        Self {
            inner: MemorySource::new(data),
            position: 0,
            fail_at: fail_at.to_vec(),
            fail_on,
            hits: Arc::new(Mutex::new(vec![0; fail_at.len()])),
        }
    }
}

impl ByteSource for FlakySource {
    fn open(&mut self, spec: &DataSpec) -> Result<Option<u64>, Mp4Error> {
        self.position = spec.position;
        self.inner.open(spec)
    }

    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Mp4Error> {
        let mut len = buf.len();
        if let Some(i) = self.fail_at.iter().position(|p| *p == self.position) {
            let mut hits = self.hits.lock();
            hits[i] += 1;
            if hits[i] == self.fail_on {
                return Err(std::io::Error::new(ErrorKind::ConnectionReset, "connection dropped").into())
            }
        }
        if let Some(next) = self.fail_at.iter().filter(|p| **p > self.position).min() {
            len = len.min((next - self.position) as usize);
        }
        let n = self.inner.read(&mut buf[.. len])?;
        self.position += n as u64;
        Ok(n)
    }

    fn close(&mut self) -> Result<(), Mp4Error> {
        self.inner.close()
    }
}

#[test]
fn resumes_load_after_io_error() {
    let track = three_sample_video();
    let expected = track.samples[1].data[4 ..].to_vec();
    // first hit while prepare reads through 'mdat', second while loading
    let flaky = FlakySource::new(mp4(&[track]), &[310], 2);
    let hits = flaky.hits.clone();
    let mut source = Source::new(Box::new(flaky), "memory:", SourceConfig::default());
    source.prepare(0).unwrap();
    source.select_track(0).unwrap();

    let samples = read_all(&mut source);
    assert_eq!(samples.len(), 3);
    assert_eq!(hits.lock()[0], 3);
    // partially streamed sample is streamed again from its start
    assert_eq!(samples[1].size, 80);
    assert_eq!(&samples[1].bytes()[4 ..], expected.as_slice());
}

#[test]
fn retry_count_resets_after_progress() {
    // fails while streaming the second sample, then again on the third
    let flaky = FlakySource::new(mp4(&[three_sample_video()]), &[310, 610], 2);
    let hits = flaky.hits.clone();
    let config = SourceConfig::default().with_max_load_retries(1);
    let mut source = Source::new(Box::new(flaky), "memory:", config);
    source.prepare(0).unwrap();
    source.select_track(0).unwrap();

    let samples = read_all(&mut source);
    assert_eq!(samples.iter().map(|s| s.size).collect::<Vec<_>>(), vec![50, 80, 40]);
    assert_eq!(*hits.lock(), vec![3, 3]);
}

#[test]
fn io_error_surfaces_without_retries() {
    let flaky = FlakySource::new(mp4(&[three_sample_video()]), &[310], 2);
    let config = SourceConfig::default().with_max_load_retries(0);
    let mut source = Source::new(Box::new(flaky), "memory:", config);
    source.prepare(0).unwrap();
    source.select_track(0).unwrap();

    let mut holder = SampleHolder::new();
    assert_eq!(source.read_sample(&mut holder).unwrap(), ReadResult::Sample(50));
    let err = source.read_sample(&mut holder).unwrap_err();
    assert!(err.is_recoverable());
}

#[test]
fn prepare_retries_io_errors() {
    let flaky = FlakySource::new(mp4(&[three_sample_video()]), &[310], 1);
    let hits = flaky.hits.clone();
    let mut source = Source::new(Box::new(flaky), "memory:", SourceConfig::default());
    source.prepare(0).unwrap();
    assert_eq!(hits.lock()[0], 2);
    assert_eq!(source.track_count(), 1);
}

// Loader level

struct Outputs {
    pool: Arc<AllocatorPool>,
    outputs: Mutex<Vec<Arc<TrackOutput>>>,
}

impl ExtractorOutput for Outputs {
    fn track_output(&self, index: usize) -> Arc<TrackOutput> {
        let mut outputs = self.outputs.lock();
        while outputs.len() <= index {
            outputs.push(Arc::new(TrackOutput::new(self.pool.clone())));
        }
        outputs[index].clone()
    }

    fn built_tracks(&self) {}
}

/// Parser with `moov` parsed, the source it was parsed from and its outputs.
fn prepared_parser(data: Vec<u8>, block_size: usize) -> (Arc<Mutex<AtomParser>>, SharedSource, Arc<Outputs>) {
    let outputs = Arc::new(Outputs {
        pool: Arc::new(AllocatorPool::new(block_size)),
        outputs: Mutex::new(Vec::new()),
    });
    let mut parser = AtomParser::new(outputs.clone(), 1 << 20);
    let mut source = MemorySource::new(data);
    let len = source.open(&DataSpec::new("memory:", 0)).unwrap();
    let mut input = BufferedInput::new(&mut source, 0, len, Default::default());
    while !parser.is_prepared() {
        assert_eq!(parser.read(&mut input, None).unwrap(), ParseResult::Continue);
    }
    source.close().unwrap();

    let shared: SharedSource = Arc::new(Mutex::new(Box::new(source)));
    (Arc::new(Mutex::new(parser)), shared, outputs)
}

#[test]
fn sync_pass_stops_at_buffer_limit() {
    let (parser, source, outputs) = prepared_parser(mp4(&[audio_track(1, 32, 4, 64)]), 64);
    let pool = outputs.pool.clone();
    let mut loadable = Loadable::new(source, "memory:", parser.clone(), pool.clone(), 128)
        .at(32, Some(0));

    let outcome = loadable.load(LoadMode::Sync).unwrap();
    assert_eq!(outcome, LoadOutcome::Suspended(32 + 128));
    let output = outputs.track_output(0);
    assert_eq!(output.write_index(), 2);
    assert_eq!(pool.allocated_count(), 2);

    let mut holder = SampleHolder::new();
    assert!(output.get_sample(&mut holder));
    assert_eq!(pool.allocated_count(), 1);

    // resumes with the third sample
    let outcome = loadable.load(LoadMode::Sync).unwrap();
    assert_eq!(outcome, LoadOutcome::Suspended(32 + 192));
    assert_eq!(output.write_index(), 3);
    assert_eq!(parser.lock().sample_index(0), Some(3));
}

#[test]
fn stopping_cancels_background_pass() {
    let (parser, source, outputs) = prepared_parser(mp4(&[audio_track(1, 32, 6, 64)]), 64);
    let pool = outputs.pool.clone();
    let mut loader = Loader::new(source, "memory:", parser, pool.clone(), 128);

    loader.start_loading_at(32, Some(0));
    // the background pass waits for blocks to be released
    loader.stop_loading();
    assert!(!loader.is_loading());
    assert!(loader.is_cancel_requested());
    assert!(loader.is_cancelled());
    assert!(!loader.is_finished());
    assert!(loader.take_error().is_none());

    let output = outputs.track_output(0);
    assert_eq!(output.write_index(), 2);
    output.clear();
    assert_eq!(pool.allocated_count(), 0);
}

#[test]
fn small_input_loads_synchronously() {
    let (parser, source, outputs) = prepared_parser(mp4(&[audio_track(1, 32, 3, 10)]), 64);
    let mut loader = Loader::new(source, "memory:", parser, outputs.pool.clone(), 1024);

    loader.start_loading_at(32, None);
    assert!(loader.is_finished());
    assert!(!loader.is_loading());
    assert!(!loader.is_cancelled());
    assert_eq!(outputs.track_output(0).write_index(), 3);
}
