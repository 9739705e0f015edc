//! Full-duplex audio bridging.
//!
//! Uplink: capture PCM → optional mic/reference de-interleave → optional
//! resample to the 16kHz wire rate → frontend feeds (wake word, VAD) →
//! encode on the background worker → encoded-frame sink.
//!
//! Downlink: playback queue → decode on the background worker → optional
//! resample to the device rate → codec output. The queue is the one
//! structure shared with the network thread and is mutex-protected;
//! everything else is owned by the scheduler thread.

use crate::audio::codec::{CodecFactory, FrameDecoder, FrameEncoder};
use crate::audio::resampler::StreamResampler;
use crate::audio::sound;
use crate::background::BackgroundQueue;
use crate::board::AudioCodecDevice;
use crate::defaults;
use crate::error::Result;
use crate::state::{DeviceState, StateCell};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Audio-processing collaborator fed with uplink PCM while running
/// (wake-word detector, VAD, echo canceller).
pub trait AudioFrontend: Send {
    fn start(&mut self);
    fn stop(&mut self);
    fn is_running(&self) -> bool;
    fn feed(&mut self, pcm: &[i16]);
}

/// Receives encoded uplink frames from the background worker.
pub type EncodedSink = Arc<dyn Fn(Vec<u8>) + Send + Sync>;

/// Cloneable producer handle to the playback queue, handed to the network
/// receive path.
#[derive(Clone)]
pub struct PlaybackQueue {
    frames: Arc<Mutex<VecDeque<Vec<u8>>>>,
    state: Arc<StateCell>,
}

impl PlaybackQueue {
    /// Enqueues a received frame, but only while the device is speaking —
    /// audio arriving in any other state is dropped at the door.
    pub fn push_if_speaking(&self, frame: Vec<u8>) {
        if self.state.load() == DeviceState::Speaking {
            self.frames
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push_back(frame);
        }
    }

    pub fn len(&self) -> usize {
        self.frames.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

pub struct AudioPipeline {
    device: Arc<dyn AudioCodecDevice>,
    factory: Arc<dyn CodecFactory>,
    encoder: Arc<Mutex<Box<dyn FrameEncoder>>>,
    decoder: Arc<Mutex<Box<dyn FrameDecoder>>>,
    playback: Arc<Mutex<VecDeque<Vec<u8>>>>,
    state: Arc<StateCell>,
    aborted: Arc<AtomicBool>,
    mic_resampler: Option<StreamResampler>,
    reference_resampler: Option<StreamResampler>,
    output_resampler: Arc<Mutex<Option<StreamResampler>>>,
    decode_sample_rate: u32,
    last_output: Arc<Mutex<Instant>>,
    idle_silence: Duration,
    frontends: Vec<Box<dyn AudioFrontend>>,
    encoded_sink: EncodedSink,
}

impl AudioPipeline {
    pub fn new(
        device: Arc<dyn AudioCodecDevice>,
        factory: Arc<dyn CodecFactory>,
        state: Arc<StateCell>,
        aborted: Arc<AtomicBool>,
        idle_silence: Duration,
        frame_duration_ms: u32,
    ) -> Result<Self> {
        let decode_sample_rate = device.output_sample_rate();
        let decoder = factory.decoder(decode_sample_rate, defaults::WIRE_CHANNELS);
        let encoder = factory.encoder(
            defaults::WIRE_SAMPLE_RATE,
            defaults::WIRE_CHANNELS,
            frame_duration_ms,
        );

        let input_rate = device.input_sample_rate();
        let (mic_resampler, reference_resampler) = if input_rate != defaults::WIRE_SAMPLE_RATE {
            info!(
                from = input_rate,
                to = defaults::WIRE_SAMPLE_RATE,
                "uplink resampling enabled"
            );
            let mic = StreamResampler::new(input_rate, defaults::WIRE_SAMPLE_RATE)?;
            let reference = if device.input_channels() == 2 {
                Some(StreamResampler::new(input_rate, defaults::WIRE_SAMPLE_RATE)?)
            } else {
                None
            };
            (Some(mic), reference)
        } else {
            (None, None)
        };

        Ok(Self {
            device,
            factory,
            encoder: Arc::new(Mutex::new(encoder)),
            decoder: Arc::new(Mutex::new(decoder)),
            playback: Arc::new(Mutex::new(VecDeque::new())),
            state,
            aborted,
            mic_resampler,
            reference_resampler,
            output_resampler: Arc::new(Mutex::new(None)),
            decode_sample_rate,
            last_output: Arc::new(Mutex::new(Instant::now())),
            idle_silence,
            frontends: Vec::new(),
            encoded_sink: Arc::new(|_| {}),
        })
    }

    /// Wires the destination for encoded uplink frames. Called from the
    /// background worker, so the sink typically schedules the actual
    /// protocol send onto the main thread.
    pub fn set_encoded_sink(&mut self, sink: EncodedSink) {
        self.encoded_sink = sink;
    }

    pub fn add_frontend(&mut self, frontend: Box<dyn AudioFrontend>) {
        self.frontends.push(frontend);
    }

    pub fn start_frontends(&mut self) {
        for frontend in &mut self.frontends {
            frontend.start();
        }
    }

    pub fn stop_frontends(&mut self) {
        for frontend in &mut self.frontends {
            frontend.stop();
        }
    }

    /// Handle for the network receive path.
    pub fn playback_queue(&self) -> PlaybackQueue {
        PlaybackQueue {
            frames: Arc::clone(&self.playback),
            state: Arc::clone(&self.state),
        }
    }

    pub fn playback_len(&self) -> usize {
        self.playback.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// One uplink step, run when the codec signals input ready.
    pub fn process_input(&mut self, background: &BackgroundQueue) {
        let Some(mut data) = self.device.read_input() else {
            return;
        };

        if self.mic_resampler.is_some() {
            data = match self.resample_uplink(data) {
                Ok(data) => data,
                Err(e) => {
                    warn!(error = %e, "uplink resample failed, dropping buffer");
                    return;
                }
            };
        }

        for frontend in &mut self.frontends {
            if frontend.is_running() {
                frontend.feed(&data);
            }
        }

        if self.state.load() != DeviceState::Listening {
            return;
        }

        let pcm = if self.device.input_channels() == 2 {
            mic_channel(&data)
        } else {
            data
        };

        let encoder = Arc::clone(&self.encoder);
        let sink = Arc::clone(&self.encoded_sink);
        background.schedule(move || {
            let mut encoder = encoder.lock().unwrap_or_else(|e| e.into_inner());
            match encoder.encode(&pcm) {
                Ok(frame) if !frame.is_empty() => sink(frame),
                Ok(_) => {}
                Err(e) => debug!(error = %e, "encode failed, frame dropped"),
            }
        });
    }

    /// One downlink step, run when the codec signals output ready.
    pub fn process_output(&self, background: &BackgroundQueue) {
        let state = self.state.load();
        let mut queue = self.playback.lock().unwrap_or_else(|e| e.into_inner());

        if queue.is_empty() {
            if state == DeviceState::Idle {
                let last = *self.last_output.lock().unwrap_or_else(|e| e.into_inner());
                if last.elapsed() > self.idle_silence {
                    self.device.enable_output(false);
                }
            }
            return;
        }

        // Anything queued while listening is stale playback; discard it.
        if state == DeviceState::Listening {
            queue.clear();
            return;
        }

        *self.last_output.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
        let Some(frame) = queue.pop_front() else {
            return;
        };
        drop(queue);

        let decoder = Arc::clone(&self.decoder);
        let output_resampler = Arc::clone(&self.output_resampler);
        let aborted = Arc::clone(&self.aborted);
        let device = Arc::clone(&self.device);
        background.schedule(move || {
            if aborted.load(Ordering::SeqCst) {
                return;
            }

            let pcm = {
                let mut decoder = decoder.lock().unwrap_or_else(|e| e.into_inner());
                match decoder.decode(&frame) {
                    Ok(pcm) => pcm,
                    Err(e) => {
                        debug!(error = %e, "decode failed, frame skipped");
                        return;
                    }
                }
            };

            let pcm = {
                let mut resampler = output_resampler.lock().unwrap_or_else(|e| e.into_inner());
                match resampler.as_mut() {
                    Some(resampler) => match resampler.process(&pcm) {
                        Ok(pcm) => pcm,
                        Err(e) => {
                            warn!(error = %e, "downlink resample failed, frame skipped");
                            return;
                        }
                    },
                    None => pcm,
                }
            };

            if !pcm.is_empty() {
                device.write_output(&pcm);
            }
        });
    }

    /// Rebuilds the decoder (and downlink resampler) for a newly negotiated
    /// server sample rate. No-op when the rate is unchanged.
    pub fn set_decode_sample_rate(&mut self, sample_rate: u32) -> Result<()> {
        if self.decode_sample_rate == sample_rate {
            return Ok(());
        }

        self.decode_sample_rate = sample_rate;
        *self.decoder.lock().unwrap_or_else(|e| e.into_inner()) =
            self.factory.decoder(sample_rate, defaults::WIRE_CHANNELS);
        // A rate change is a full decoder reset: queued frames were encoded
        // for the old rate, and the silence baseline restarts.
        self.playback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.last_output.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();

        let device_rate = self.device.output_sample_rate();
        let resampler = if sample_rate != device_rate {
            info!(from = sample_rate, to = device_rate, "downlink resampling enabled");
            Some(StreamResampler::new(sample_rate, device_rate)?)
        } else {
            None
        };
        *self
            .output_resampler
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = resampler;
        Ok(())
    }

    pub fn decode_sample_rate(&self) -> u32 {
        self.decode_sample_rate
    }

    /// Resets decoder state, clears pending playback and rebases the
    /// silence timer. Run on entering Listening or Speaking.
    pub fn reset_decoder(&self) {
        self.decoder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset_state();
        self.playback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
        *self.last_output.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    pub fn reset_encoder(&self) {
        self.encoder
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .reset_state();
    }

    pub fn clear_playback(&self) {
        self.playback
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }

    /// Queues a local notification sound pack for playback, forcing the
    /// decoder back to the 16kHz rate the packs are encoded at.
    pub fn enqueue_sound(&mut self, pack: &[u8]) -> Result<()> {
        self.set_decode_sample_rate(defaults::WIRE_SAMPLE_RATE)?;
        let mut queue = self.playback.lock().unwrap_or_else(|e| e.into_inner());
        for frame in sound::split_frames(pack) {
            queue.push_back(frame);
        }
        Ok(())
    }
}

/// Extracts the microphone channel from interleaved mic/reference data.
fn mic_channel(data: &[i16]) -> Vec<i16> {
    data.iter().step_by(2).copied().collect()
}

impl AudioPipeline {
    fn resample_uplink(&mut self, data: Vec<i16>) -> Result<Vec<i16>> {
        if self.device.input_channels() == 2 {
            let mut mic = Vec::with_capacity(data.len() / 2);
            let mut reference = Vec::with_capacity(data.len() / 2);
            for pair in data.chunks_exact(2) {
                mic.push(pair[0]);
                reference.push(pair[1]);
            }

            let mic = match self.mic_resampler.as_mut() {
                Some(resampler) => resampler.process(&mic)?,
                None => mic,
            };
            let reference = match self.reference_resampler.as_mut() {
                Some(resampler) => resampler.process(&reference)?,
                None => reference,
            };

            let mut merged = Vec::with_capacity(mic.len() * 2);
            for (m, r) in mic.iter().zip(reference.iter()) {
                merged.push(*m);
                merged.push(*r);
            }
            Ok(merged)
        } else {
            match self.mic_resampler.as_mut() {
                Some(resampler) => resampler.process(&data),
                None => Ok(data),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::codec::Pcm16Codec;
    use crate::board::MockCodecDevice;

    fn wire_native_pipeline() -> (AudioPipeline, Arc<MockCodecDevice>, Arc<StateCell>) {
        let device = Arc::new(MockCodecDevice::wire_native());
        let state = Arc::new(StateCell::new(DeviceState::Idle));
        let pipeline = AudioPipeline::new(
            Arc::clone(&device) as Arc<dyn AudioCodecDevice>,
            Arc::new(Pcm16Codec),
            Arc::clone(&state),
            Arc::new(AtomicBool::new(false)),
            Duration::from_secs(10),
            60,
        )
        .unwrap();
        (pipeline, device, state)
    }

    #[test]
    fn test_uplink_encodes_only_while_listening() {
        let (mut pipeline, device, state) = wire_native_pipeline();
        let background = BackgroundQueue::new();

        let sent: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        pipeline.set_encoded_sink(Arc::new(move |frame| {
            sink.lock().unwrap().push(frame);
        }));

        // Idle: buffer consumed, nothing encoded.
        device.push_input(vec![1, 2, 3, 4]);
        pipeline.process_input(&background);
        background.wait_for_completion();
        assert!(sent.lock().unwrap().is_empty());

        // Listening: buffer encoded and delivered to the sink.
        state.store(DeviceState::Listening);
        device.push_input(vec![5, 6, 7, 8]);
        pipeline.process_input(&background);
        background.wait_for_completion();

        let frames = sent.lock().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0], vec![5, 0, 6, 0, 7, 0, 8, 0]);
    }

    #[test]
    fn test_downlink_decodes_to_device() {
        let (pipeline, device, state) = wire_native_pipeline();
        let background = BackgroundQueue::new();
        state.store(DeviceState::Speaking);

        let queue = pipeline.playback_queue();
        queue.push_if_speaking(vec![10, 0, 20, 0]);

        pipeline.process_output(&background);
        background.wait_for_completion();

        assert_eq!(device.written(), vec![vec![10, 20]]);
    }

    #[test]
    fn test_playback_queue_drops_frames_unless_speaking() {
        let (pipeline, _device, state) = wire_native_pipeline();
        let queue = pipeline.playback_queue();

        queue.push_if_speaking(vec![1, 0]);
        assert_eq!(queue.len(), 0);

        state.store(DeviceState::Speaking);
        queue.push_if_speaking(vec![1, 0]);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn test_listening_clears_pending_playback() {
        let (pipeline, device, state) = wire_native_pipeline();
        let background = BackgroundQueue::new();

        state.store(DeviceState::Speaking);
        let queue = pipeline.playback_queue();
        for _ in 0..5 {
            queue.push_if_speaking(vec![1, 0]);
        }
        assert_eq!(pipeline.playback_len(), 5);

        state.store(DeviceState::Listening);
        pipeline.process_output(&background);
        background.wait_for_completion();

        assert_eq!(pipeline.playback_len(), 0);
        assert!(device.written().is_empty());
    }

    #[test]
    fn test_abort_flag_suppresses_output() {
        let device = Arc::new(MockCodecDevice::wire_native());
        let state = Arc::new(StateCell::new(DeviceState::Speaking));
        let aborted = Arc::new(AtomicBool::new(false));
        let pipeline = AudioPipeline::new(
            Arc::clone(&device) as Arc<dyn AudioCodecDevice>,
            Arc::new(Pcm16Codec),
            Arc::clone(&state),
            Arc::clone(&aborted),
            Duration::from_secs(10),
            60,
        )
        .unwrap();
        let background = BackgroundQueue::new();

        let queue = pipeline.playback_queue();
        queue.push_if_speaking(vec![1, 0, 2, 0]);

        aborted.store(true, Ordering::SeqCst);
        pipeline.process_output(&background);
        background.wait_for_completion();

        assert!(device.written().is_empty());
    }

    #[test]
    fn test_decode_error_drops_frame_and_continues() {
        let (pipeline, device, state) = wire_native_pipeline();
        let background = BackgroundQueue::new();
        state.store(DeviceState::Speaking);

        let queue = pipeline.playback_queue();
        queue.push_if_speaking(vec![1, 0, 2]); // odd length: decode error
        queue.push_if_speaking(vec![3, 0]);

        pipeline.process_output(&background);
        pipeline.process_output(&background);
        background.wait_for_completion();

        assert_eq!(device.written(), vec![vec![3]]);
    }

    #[test]
    fn test_idle_silence_disables_output() {
        let device = Arc::new(MockCodecDevice::wire_native());
        let state = Arc::new(StateCell::new(DeviceState::Idle));
        let pipeline = AudioPipeline::new(
            Arc::clone(&device) as Arc<dyn AudioCodecDevice>,
            Arc::new(Pcm16Codec),
            Arc::clone(&state),
            Arc::new(AtomicBool::new(false)),
            Duration::from_millis(0),
            60,
        )
        .unwrap();
        let background = BackgroundQueue::new();

        device.enable_output(true);
        std::thread::sleep(Duration::from_millis(5));
        pipeline.process_output(&background);

        assert!(!device.output_enabled());
    }

    #[test]
    fn test_set_decode_sample_rate_is_noop_when_unchanged() {
        let (mut pipeline, _device, _state) = wire_native_pipeline();
        assert_eq!(pipeline.decode_sample_rate(), 16000);

        pipeline.set_decode_sample_rate(16000).unwrap();
        assert_eq!(pipeline.decode_sample_rate(), 16000);

        pipeline.set_decode_sample_rate(24000).unwrap();
        assert_eq!(pipeline.decode_sample_rate(), 24000);
    }

    #[test]
    fn test_reset_decoder_clears_queue() {
        let (pipeline, _device, state) = wire_native_pipeline();
        state.store(DeviceState::Speaking);

        let queue = pipeline.playback_queue();
        queue.push_if_speaking(vec![1, 0]);
        queue.push_if_speaking(vec![2, 0]);
        assert_eq!(pipeline.playback_len(), 2);

        pipeline.reset_decoder();
        assert_eq!(pipeline.playback_len(), 0);
    }

    #[test]
    fn test_enqueue_sound_splits_pack_into_queue() {
        let (mut pipeline, _device, _state) = wire_native_pipeline();

        let pack = sound::build_pack(&[&[1, 0, 2, 0], &[3, 0]]);
        pipeline.enqueue_sound(&pack).unwrap();

        assert_eq!(pipeline.playback_len(), 2);
    }

    struct RecordingFrontend {
        running: bool,
        fed: Arc<Mutex<Vec<usize>>>,
    }

    impl AudioFrontend for RecordingFrontend {
        fn start(&mut self) {
            self.running = true;
        }

        fn stop(&mut self) {
            self.running = false;
        }

        fn is_running(&self) -> bool {
            self.running
        }

        fn feed(&mut self, pcm: &[i16]) {
            self.fed.lock().unwrap().push(pcm.len());
        }
    }

    #[test]
    fn test_frontends_are_fed_only_while_running() {
        let (mut pipeline, device, _state) = wire_native_pipeline();
        let background = BackgroundQueue::new();

        let fed: Arc<Mutex<Vec<usize>>> = Arc::new(Mutex::new(Vec::new()));
        pipeline.add_frontend(Box::new(RecordingFrontend {
            running: false,
            fed: Arc::clone(&fed),
        }));

        // Stopped frontend: capture flows past it untouched.
        device.push_input(vec![0i16; 160]);
        pipeline.process_input(&background);
        assert!(fed.lock().unwrap().is_empty());

        pipeline.start_frontends();
        device.push_input(vec![0i16; 160]);
        pipeline.process_input(&background);
        assert_eq!(*fed.lock().unwrap(), vec![160]);

        pipeline.stop_frontends();
        device.push_input(vec![0i16; 160]);
        pipeline.process_input(&background);
        assert_eq!(fed.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_stereo_resampled_uplink_reaches_sink() {
        let device = Arc::new(MockCodecDevice::new(32000, 16000, 2));
        let state = Arc::new(StateCell::new(DeviceState::Listening));
        let mut pipeline = AudioPipeline::new(
            Arc::clone(&device) as Arc<dyn AudioCodecDevice>,
            Arc::new(Pcm16Codec),
            Arc::clone(&state),
            Arc::new(AtomicBool::new(false)),
            Duration::from_secs(10),
            60,
        )
        .unwrap();
        let background = BackgroundQueue::new();

        let sent: Arc<Mutex<Vec<Vec<u8>>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&sent);
        pipeline.set_encoded_sink(Arc::new(move |frame| {
            sink.lock().unwrap().push(frame);
        }));

        // 8192 interleaved samples = 4096 per channel = four resampler chunks.
        device.push_input(vec![0i16; 8192]);
        pipeline.process_input(&background);
        background.wait_for_completion();

        assert!(!sent.lock().unwrap().is_empty());
    }
}
