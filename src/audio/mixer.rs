//! The real-time mix stage.
//!
//! Runs on the audio callback. Pulls the latest finished block from each
//! engine's scratch ring, applies dry levels and reverb sends from the live
//! parameter bundle, folds in the shared reverb return, and writes the
//! clamped stereo result. An engine whose block is not ready contributes
//! silence and bumps its miss counter; nothing here allocates, blocks, logs
//! or touches the OS.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::config::RuntimeConfig;
use crate::dsp::reverb::SendReverb;
use crate::params::ParamView;
use crate::rt::capture::CaptureRing;
use crate::rt::scratch::BlockConsumer;
use crate::rt::status::{EngineId, StatusCounters};

pub struct Mixer {
    additive: BlockConsumer,
    poly: BlockConsumer,
    photowave: BlockConsumer,

    reverb: SendReverb,
    params: ParamView,
    status: Arc<StatusCounters>,
    capture: Arc<CaptureRing>,
    running: Arc<AtomicBool>,

    max_frames: usize,
    dry_left: Vec<f32>,
    dry_right: Vec<f32>,
    send: Vec<f32>,
}

impl Mixer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &RuntimeConfig,
        additive: BlockConsumer,
        poly: BlockConsumer,
        photowave: BlockConsumer,
        params: ParamView,
        status: Arc<StatusCounters>,
        capture: Arc<CaptureRing>,
        running: Arc<AtomicBool>,
    ) -> Self {
        let frames = cfg.audio.audio_buffer_size;
        Self {
            additive,
            poly,
            photowave,
            reverb: SendReverb::new(cfg.audio.sampling_frequency as f32),
            params,
            status,
            capture,
            running,
            max_frames: frames,
            dry_left: vec![0.0; frames],
            dry_right: vec![0.0; frames],
            send: vec![0.0; frames],
        }
    }

    pub fn max_frames(&self) -> usize {
        self.max_frames
    }

    /// Produce one stereo block. Always fills the full output, silence
    /// included; never fails.
    pub fn render(&mut self, out_left: &mut [f32], out_right: &mut [f32]) {
        let frames = out_left.len().min(out_right.len()).min(self.max_frames);
        if !self.running.load(Ordering::Relaxed) {
            out_left.fill(0.0);
            out_right.fill(0.0);
            return;
        }

        let live = self.params.read();
        self.reverb.set_room_size(live.reverb_room_size);
        self.reverb.set_damping(live.reverb_damping);

        self.dry_left[..frames].fill(0.0);
        self.dry_right[..frames].fill(0.0);
        self.send[..frames].fill(0.0);

        let engines = [
            (
                &mut self.additive,
                live.additive_level,
                live.additive_reverb_send,
                EngineId::Additive,
            ),
            (
                &mut self.poly,
                live.poly_level,
                live.poly_reverb_send,
                EngineId::Polyphonic,
            ),
            (
                &mut self.photowave,
                live.photowave_level,
                live.photowave_reverb_send,
                EngineId::Photowave,
            ),
        ];

        let dry_left = &mut self.dry_left;
        let dry_right = &mut self.dry_right;
        let send = &mut self.send;
        for (consumer, level, send_level, id) in engines {
            let consumed = consumer.try_consume(|block| {
                let n = frames.min(block.frames());
                for f in 0..n {
                    let l = block.left[f];
                    let r = block.right[f];
                    dry_left[f] += l * level;
                    dry_right[f] += r * level;
                    send[f] += (l + r) * 0.5 * send_level;
                }
            });
            if !consumed {
                self.status.note_buffer_miss(id);
            }
        }

        let mut anomalies = 0u32;
        for f in 0..frames {
            let (wet_l, wet_r) = self.reverb.process(send[f]);
            let mut l = dry_left[f] + wet_l * live.reverb_mix;
            let mut r = dry_right[f] + wet_r * live.reverb_mix;
            if !l.is_finite() {
                l = 0.0;
                anomalies += 1;
            }
            if !r.is_finite() {
                r = 0.0;
                anomalies += 1;
            }
            l = l.clamp(-1.0, 1.0);
            r = r.clamp(-1.0, 1.0);
            self.capture.push((l + r) * 0.5);
            out_left[f] = l;
            out_right[f] = r;
        }
        for _ in 0..anomalies {
            self.status.note_numeric_anomaly();
        }

        // A short final chunk from the device still gets a full answer.
        if frames < out_left.len() {
            out_left[frames..].fill(0.0);
        }
        if frames < out_right.len() {
            out_right[frames..].fill(0.0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::{LiveParams, ParamInbox};
    use crate::rt::scratch::block_ring;
    use crate::rt::status::StatusCounters;

    struct Fixture {
        mixer: Mixer,
        producers: [crate::rt::scratch::BlockProducer; 3],
        status: Arc<StatusCounters>,
        inbox: ParamInbox,
        running: Arc<AtomicBool>,
    }

    fn fixture() -> Fixture {
        let cfg = RuntimeConfig::default();
        let (pa, ca) = block_ring(cfg.audio.audio_buffer_size);
        let (pp, cp) = block_ring(cfg.audio.audio_buffer_size);
        let (pw, cw) = block_ring(cfg.audio.audio_buffer_size);
        let (inbox, view) = ParamInbox::new(LiveParams::from_config(&cfg));
        let status = Arc::new(StatusCounters::new());
        let running = Arc::new(AtomicBool::new(true));
        let mixer = Mixer::new(
            &cfg,
            ca,
            cp,
            cw,
            view,
            Arc::clone(&status),
            Arc::new(CaptureRing::new(1 << 14)),
            Arc::clone(&running),
        );
        Fixture {
            mixer,
            producers: [pa, pp, pw],
            status,
            inbox,
            running,
        }
    }

    #[test]
    fn missing_blocks_mean_silence_and_miss_counters() {
        let mut fx = fixture();
        let mut left = vec![1.0f32; 512];
        let mut right = vec![1.0f32; 512];
        fx.mixer.render(&mut left, &mut right);

        assert!(left.iter().all(|&s| s == 0.0));
        assert!(right.iter().all(|&s| s == 0.0));
        let snap = fx.status.snapshot();
        assert_eq!(snap.buffer_misses_for(EngineId::Additive), 1);
        assert_eq!(snap.buffer_misses_for(EngineId::Polyphonic), 1);
        assert_eq!(snap.buffer_misses_for(EngineId::Photowave), 1);
    }

    #[test]
    fn ready_blocks_are_mixed_at_their_levels() {
        let mut fx = fixture();
        fx.inbox.push(crate::params::ParamId::AdditiveLevel, 0.5);
        assert!(fx.producers[0].try_fill(|b| {
            b.left.fill(0.8);
            b.right.fill(-0.8);
        }));

        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        fx.mixer.render(&mut left, &mut right);
        assert!((left[0] - 0.4).abs() < 1.0e-5);
        assert!((right[0] + 0.4).abs() < 1.0e-5);
        // Only the two engines with nothing ready count a miss.
        let snap = fx.status.snapshot();
        assert_eq!(snap.buffer_misses_for(EngineId::Additive), 0);
        assert_eq!(snap.buffer_misses_for(EngineId::Polyphonic), 1);
    }

    #[test]
    fn one_stalled_engine_does_not_disturb_the_others() {
        let mut fx = fixture();
        assert!(fx.producers[1].try_fill(|b| {
            b.left.fill(0.25);
            b.right.fill(0.25);
        }));
        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        fx.mixer.render(&mut left, &mut right);
        assert!((left[0] - 0.25).abs() < 1.0e-5);
        let snap = fx.status.snapshot();
        assert_eq!(snap.buffer_misses_for(EngineId::Additive), 1);
        assert_eq!(snap.buffer_misses_for(EngineId::Polyphonic), 0);
        assert_eq!(snap.buffer_misses_for(EngineId::Photowave), 1);
    }

    #[test]
    fn reverb_send_adds_a_wet_tail() {
        let mut fx = fixture();
        fx.inbox.push(crate::params::ParamId::PolyReverbSend, 1.0);
        fx.inbox.push(crate::params::ParamId::ReverbMix, 1.0);
        fx.inbox.push(crate::params::ParamId::PolyLevel, 0.0);

        assert!(fx.producers[1].try_fill(|b| {
            b.left.fill(0.9);
            b.right.fill(0.9);
        }));
        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        fx.mixer.render(&mut left, &mut right);

        // Dry level is zero; anything non-zero over the next blocks is the
        // reverb tail of the send.
        let mut tail = 0.0f32;
        for _ in 0..20 {
            fx.mixer.render(&mut left, &mut right);
            tail = tail.max(left.iter().fold(0.0f32, |m, s| m.max(s.abs())));
        }
        assert!(tail > 0.0, "send + mix must produce a wet return");
    }

    #[test]
    fn stopped_core_renders_silence() {
        let mut fx = fixture();
        assert!(fx.producers[0].try_fill(|b| b.left.fill(0.5)));
        fx.running.store(false, Ordering::Relaxed);
        let mut left = vec![1.0f32; 512];
        let mut right = vec![1.0f32; 512];
        fx.mixer.render(&mut left, &mut right);
        assert!(left.iter().all(|&s| s == 0.0));
        // Stopped path does not even count misses.
        assert_eq!(fx.status.snapshot().buffer_misses, [0, 0, 0]);
    }

    #[test]
    fn output_is_always_clamped() {
        let mut fx = fixture();
        for producer in &mut fx.producers {
            assert!(producer.try_fill(|b| {
                b.left.fill(5.0);
                b.right.fill(-5.0);
            }));
        }
        let mut left = vec![0.0f32; 512];
        let mut right = vec![0.0f32; 512];
        fx.mixer.render(&mut left, &mut right);
        assert!(left.iter().all(|&s| (-1.0..=1.0).contains(&s)));
        assert!(right.iter().all(|&s| (-1.0..=1.0).contains(&s)));
    }
}
