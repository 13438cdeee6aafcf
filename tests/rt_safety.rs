//! Allocation instrumentation for the audio-callback path: rendering a mix
//! block must never touch the heap, with or without ready engine blocks,
//! with the reverb running and parameters changing between blocks.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use assert_no_alloc::{assert_no_alloc, AllocDisabler};
use sp3ctra::audio::mixer::Mixer;
use sp3ctra::config::RuntimeConfig;
use sp3ctra::params::{LiveParams, ParamId, ParamInbox};
use sp3ctra::rt::capture::CaptureRing;
use sp3ctra::rt::scratch::block_ring;
use sp3ctra::rt::status::StatusCounters;

#[cfg(debug_assertions)]
#[global_allocator]
static ALLOC: AllocDisabler = AllocDisabler;

#[test]
fn mixer_render_never_allocates() {
    let cfg = RuntimeConfig::default();
    let frames = cfg.audio.audio_buffer_size;
    let (mut additive_producer, additive_consumer) = block_ring(frames);
    let (mut poly_producer, poly_consumer) = block_ring(frames);
    let (_photo_producer, photo_consumer) = block_ring(frames);
    let (mut inbox, view) = ParamInbox::new(LiveParams::from_config(&cfg));
    let status = Arc::new(StatusCounters::new());
    let running = Arc::new(AtomicBool::new(true));

    let mut mixer = Mixer::new(
        &cfg,
        additive_consumer,
        poly_consumer,
        photo_consumer,
        view,
        Arc::clone(&status),
        Arc::new(CaptureRing::new(1 << 12)),
        running,
    );

    // Reverb audibly engaged, so its whole path is exercised.
    inbox.push(ParamId::AdditiveReverbSend, 0.8);
    inbox.push(ParamId::ReverbMix, 0.5);

    let mut left = vec![0.0f32; frames];
    let mut right = vec![0.0f32; frames];

    for i in 0..64 {
        // Alternate between ready and missing blocks; both paths must be
        // allocation-free. Parameter writes happen outside the callback.
        if i % 2 == 0 {
            assert!(additive_producer.try_fill(|b| {
                b.left.fill(0.3);
                b.right.fill(0.3);
            }));
            assert!(poly_producer.try_fill(|b| {
                b.left.fill(-0.2);
                b.right.fill(0.2);
            }));
        }
        inbox.push(ParamId::ReverbRoomSize, 0.3 + (i % 5) as f32 * 0.1);

        assert_no_alloc(|| {
            mixer.render(&mut left, &mut right);
        });
        assert!(left.iter().all(|s| s.is_finite()));
    }
}
