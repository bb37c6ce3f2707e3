//! Cancel a synthetic echo and print how much of it is left.
//!
//! Run with: cargo run --example sine_echo
//!
//! A two-tone signal is "played" at 44.1 kHz stereo and comes back to a mono
//! microphone 30 ms later at a third of the level. The session resamples to
//! 48 kHz for the engine and back, and reports the residual echo per second.

use aec_pipeline::{StreamCanceller, StreamShape};
use dasp_signal::Signal;

const RATE: u32 = 44_100;
const SECONDS: usize = 4;
const ECHO_DELAY_MS: usize = 30;
const BLOCK: usize = 512;

fn main() -> aec_pipeline::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .init();

    let len = RATE as usize * SECONDS;
    let low = dasp_signal::rate(RATE as f64).const_hz(330.0).sine();
    let high = dasp_signal::rate(RATE as f64).const_hz(1_250.0).sine();
    let played: Vec<f32> = low
        .add_amp(high.scale_amp(0.5))
        .take(len)
        .map(|s| (s * 0.3) as f32)
        .collect();

    let delay = RATE as usize * ECHO_DELAY_MS / 1000;
    let recorded: Vec<f32> = (0..len)
        .map(|i| if i >= delay { played[i - delay] / 3.0 } else { 0.0 })
        .collect();

    let mut canceller: StreamCanceller = StreamCanceller::new(48_000, 2, 1)?;
    canceller.set_delay(ECHO_DELAY_MS as i32);
    println!(
        "engine at 48 kHz, caller at {}, {} samples per render frame",
        StreamShape::stereo(RATE),
        canceller.render_frame_size()
    );

    let mut cleaned = Vec::with_capacity(len);
    for (played, recorded) in played.chunks(BLOCK).zip(recorded.chunks(BLOCK)) {
        canceller.analyze(&[played, played], RATE)?;
        for frame in canceller.process(&[recorded], RATE)? {
            cleaned.extend_from_slice(&frame[0]);
        }
    }

    let second = RATE as usize;
    for (i, (before, after)) in recorded
        .chunks(second)
        .zip(cleaned.chunks(second))
        .enumerate()
    {
        let energy = |s: &[f32]| s.iter().map(|x| x * x).sum::<f32>();
        let reduction = 10.0 * (energy(before) / energy(after).max(1e-12)).log10();
        println!("second {}: echo reduced by {:5.1} dB", i + 1, reduction);
    }

    Ok(())
}
