//! End-to-end engine tests
//!
//! Drives the full path a host would: build a graph through the control
//! half, hand the RT half to an "audio thread", and verify signal flow,
//! pause semantics, keyboard routing and live graph mutation.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use sg_core::{ObjectId, RtEvent, Sample, AUDIO_CHUNK_SIZE};
use sg_engine::{
    AudioEngine, Event, EventPoster, EventStatus, HostControl, KeyboardEventKind, PosterId,
    RtEngine, EventBody, PAN_GAIN_3_DB,
};

const SAMPLE_RATE: f32 = 48_000.0;

/// Run one chunk of constant input through the RT half
fn process_chunk(rt: &mut RtEngine, input_value: Sample, channels: usize) -> Vec<Vec<Sample>> {
    let input: Vec<Vec<Sample>> = vec![vec![input_value; AUDIO_CHUNK_SIZE]; channels];
    let input_refs: Vec<&[Sample]> = input.iter().map(|c| c.as_slice()).collect();
    let mut output: Vec<Vec<Sample>> = vec![vec![0.0; AUDIO_CHUNK_SIZE]; channels];
    {
        let mut output_refs: Vec<&mut [Sample]> =
            output.iter_mut().map(|c| c.as_mut_slice()).collect();
        rt.process_chunk(&input_refs, &mut output_refs);
    }
    output
}

fn stereo_engine_with_track(name: &str) -> AudioEngine {
    let mut engine = AudioEngine::new(SAMPLE_RATE);
    engine.create_track(name, 2).unwrap();
    engine.connect_audio_input_channel(0, 0, name).unwrap();
    engine.connect_audio_input_channel(1, 1, name).unwrap();
    engine.connect_audio_output_channel(0, 0, name).unwrap();
    engine.connect_audio_output_channel(1, 1, name).unwrap();
    engine
}

#[test]
fn test_mono_track_identity() {
    let mut engine = AudioEngine::new(SAMPLE_RATE);
    engine.create_track("main", 1).unwrap();
    engine.connect_audio_input_channel(0, 0, "main").unwrap();
    engine.connect_audio_output_channel(0, 0, "main").unwrap();

    let mut rt = engine.take_rt_engine().unwrap();
    let output = process_chunk(&mut rt, 1.0, 1);

    // Empty chain, unity gain, centre pan: bit-exact pass-through
    for i in 0..AUDIO_CHUNK_SIZE {
        assert_eq!(output[0][i], 1.0);
    }
}

#[test]
fn test_pan_hard_left() {
    let mut engine = stereo_engine_with_track("main");
    engine
        .set_parameter_value("main", "pan_main", -1.0)
        .unwrap();

    let mut rt = engine.take_rt_engine().unwrap();
    let output = process_chunk(&mut rt, 1.0, 2);

    assert!((output[0][0] - PAN_GAIN_3_DB).abs() < 1e-6);
    assert_eq!(output[1][0], 0.0);
}

#[test]
fn test_gain_parameter_round_trip() {
    let mut engine = stereo_engine_with_track("main");
    // -120 dB maps to a hard zero through the dB pre-processor
    engine
        .set_parameter_value("main", "gain_main", -120.0)
        .unwrap();
    assert_eq!(engine.parameter_value("main", "gain_main").unwrap(), -120.0);

    let mut rt = engine.take_rt_engine().unwrap();
    let output = process_chunk(&mut rt, 1.0, 2);
    assert_eq!(output[0][0], 0.0);
    assert_eq!(output[1][0], 0.0);
}

#[test]
fn test_stop_engine_silences_and_resume_recovers() {
    let mut engine = stereo_engine_with_track("main");
    let mut rt = engine.take_rt_engine().unwrap();

    let output = process_chunk(&mut rt, 0.5, 2);
    assert_eq!(output[0][0], 0.5);

    // Stop: the callback keeps running but the graph is skipped
    assert!(engine
        .dispatcher()
        .post_rt_event(RtEvent::stop_engine(sg_core::next_event_id())));
    let output = process_chunk(&mut rt, 0.5, 2);
    assert_eq!(output[0][0], 0.0);
    assert!(rt.is_paused());

    // Resume through the command path
    engine.return_rt_engine(rt);
    engine.resume_processing().unwrap();
    let mut rt = engine.take_rt_engine().unwrap();
    let output = process_chunk(&mut rt, 0.5, 2);
    assert_eq!(output[0][0], 0.5);
}

#[test]
fn test_connection_validation() {
    let mut engine = AudioEngine::new(SAMPLE_RATE);
    engine.create_track("main", 2).unwrap();

    assert!(engine.connect_audio_input_channel(0, 0, "missing").is_err());
    assert!(engine.connect_audio_input_channel(64, 0, "main").is_err());
    assert!(engine.connect_audio_input_channel(0, 7, "main").is_err());
    assert!(engine.connect_audio_input_bus(0, 3, "main").is_err());
}

#[test]
fn test_duplicate_track_name_rejected() {
    let mut engine = AudioEngine::new(SAMPLE_RATE);
    engine.create_track("main", 2).unwrap();
    assert!(engine.create_track("main", 2).is_err());

    engine.delete_track("main").unwrap();
    engine.create_track("main", 2).unwrap();
}

#[test]
fn test_multibus_track_buses_mix_independently() {
    let mut engine = AudioEngine::new(SAMPLE_RATE);
    engine.create_multibus_track("buses", 2, 2).unwrap();
    engine.connect_audio_input_bus(0, 0, "buses").unwrap();
    engine.connect_audio_input_bus(1, 1, "buses").unwrap();
    engine.connect_audio_output_bus(0, 0, "buses").unwrap();
    engine.connect_audio_output_bus(1, 1, "buses").unwrap();

    // Silence the second bus only
    engine
        .set_parameter_value("buses", "gain_sub_1", -120.0)
        .unwrap();

    let mut rt = engine.take_rt_engine().unwrap();
    let output = process_chunk(&mut rt, 1.0, 4);

    assert_eq!(output[0][0], 1.0);
    assert_eq!(output[1][0], 1.0);
    assert_eq!(output[2][0], 0.0);
    assert_eq!(output[3][0], 0.0);
}

struct KeyboardRecorder {
    id: PosterId,
    notes: Arc<Mutex<Vec<(ObjectId, u8)>>>,
}

impl EventPoster for KeyboardRecorder {
    fn poster_id(&self) -> PosterId {
        self.id
    }

    fn process_event(&mut self, event: &mut Event) -> EventStatus {
        if let EventBody::KeyboardNotification(e) = event.body() {
            if e.kind == KeyboardEventKind::NoteOn {
                self.notes.lock().push((e.track_id, e.note));
            }
        }
        EventStatus::HandledOk
    }
}

#[test]
fn test_keyboard_event_forwarded_out_of_empty_track() {
    let mut engine = stereo_engine_with_track("keys");
    let track_id = engine.processor_id_from_name("keys").unwrap();

    let notes = Arc::new(Mutex::new(Vec::new()));
    engine.dispatcher().register_poster(Box::new(KeyboardRecorder {
        id: PosterId::OscFrontend,
        notes: notes.clone(),
    }));
    engine.start();

    let rt = engine.take_rt_engine().unwrap();
    let running = Arc::new(AtomicBool::new(true));
    let audio_running = running.clone();
    let audio_thread = thread::spawn(move || {
        let mut rt = rt;
        while audio_running.load(Ordering::Relaxed) {
            let _ = process_chunk(&mut rt, 0.0, 2);
            thread::sleep(Duration::from_micros(200));
        }
        rt
    });

    engine.send_note_on("keys", 64, 0.8).unwrap();

    // The note crosses to the audio thread, is re-emitted by the empty
    // track under its own id, and comes back out as a notification
    let deadline = Instant::now() + Duration::from_secs(2);
    while notes.lock().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(1));
    }

    running.store(false, Ordering::SeqCst);
    let rt = audio_thread.join().unwrap();
    engine.return_rt_engine(rt);
    engine.stop();

    let notes = notes.lock();
    assert_eq!(notes.as_slice(), &[(track_id, 64)]);
}

#[test]
fn test_graph_mutation_under_live_processing() {
    let mut engine = AudioEngine::new(SAMPLE_RATE);
    let rt = engine.take_rt_engine().unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let audio_running = running.clone();
    let audio_thread = thread::spawn(move || {
        let mut rt = rt;
        while audio_running.load(Ordering::Relaxed) {
            let _ = process_chunk(&mut rt, 0.0, 2);
            thread::sleep(Duration::from_micros(200));
        }
        rt
    });

    // Mutations are acknowledged by the live audio thread
    engine.create_track("live", 2).unwrap();
    engine.connect_audio_input_channel(0, 0, "live").unwrap();
    engine.connect_audio_output_channel(0, 0, "live").unwrap();
    assert_eq!(engine.track_list().len(), 1);

    engine.delete_track("live").unwrap();
    assert!(engine.track_list().is_empty());

    running.store(false, Ordering::SeqCst);
    let rt = audio_thread.join().unwrap();
    engine.return_rt_engine(rt);
}

#[test]
fn test_transport_state_follows_events() {
    let mut engine = AudioEngine::new(SAMPLE_RATE);
    engine.start();
    engine.set_tempo(140.0).unwrap();
    engine
        .set_transport_mode(sg_core::PlayingMode::Playing)
        .unwrap();

    let mut rt = engine.take_rt_engine().unwrap();
    // Give the dispatcher time to relay the events, then run a few chunks
    thread::sleep(Duration::from_millis(50));
    for _ in 0..4 {
        let _ = process_chunk(&mut rt, 0.0, 2);
    }

    assert_eq!(rt.transport().tempo(), 140.0);
    assert_eq!(
        rt.transport().position_samples(),
        4 * AUDIO_CHUNK_SIZE as u64
    );
    engine.return_rt_engine(rt);
    engine.stop();
}
