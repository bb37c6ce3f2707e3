//! C function surface
//!
//! An opaque [`AecSession`] handle wraps a [`CancellationSession`] running the
//! default engine. Every entry point checks for null handles and turns panics
//! into [`AEC_ERROR_PANIC`]; no Rust panic crosses the boundary.
//!
//! Directions are passed as [`AEC_RENDER`] / [`AEC_CAPTURE`], stages as
//! [`AEC_STAGE_INPUT`] / [`AEC_STAGE_PROCESSING`] / [`AEC_STAGE_OUTPUT`].

use core::ffi::{c_int, c_uint};
use core::ptr;
use std::panic::{catch_unwind, AssertUnwindSafe};

use hashbrown::HashMap;
use tracing::warn;

use crate::error::Error;
use crate::pipeline::{Direction, PipelineConfig, Stage};
use crate::session::{CancellationSession, SessionConfig};
use crate::shape::StreamShape;

pub const AEC_OK: c_int = 0;
pub const AEC_ERROR_NULL: c_int = -1;
pub const AEC_ERROR_ARGUMENT: c_int = -2;
pub const AEC_ERROR_CONFIG: c_int = -3;
pub const AEC_ERROR_STATE: c_int = -4;
pub const AEC_ERROR_ALLOCATION: c_int = -5;
pub const AEC_ERROR_PANIC: c_int = -6;

pub const AEC_RENDER: c_int = 0;
pub const AEC_CAPTURE: c_int = 1;

pub const AEC_STAGE_INPUT: c_int = 0;
pub const AEC_STAGE_PROCESSING: c_int = 1;
pub const AEC_STAGE_OUTPUT: c_int = 2;

/// Session handle owned by the C caller.
pub struct AecSession {
    session: CancellationSession,
    /// Channel pointer arrays handed out by [`aec_channels`]; dropped on
    /// reconfiguration together with the buffers they point into.
    channel_tables: HashMap<(Direction, Stage), Vec<*mut f32>>,
}

fn status(err: &Error) -> c_int {
    match err {
        Error::Allocation { .. } => AEC_ERROR_ALLOCATION,
        Error::NotConfigured(_)
        | Error::MissingStage { .. }
        | Error::OutOfOrder { .. }
        | Error::AlreadySplit
        | Error::NotSplit => AEC_ERROR_STATE,
        _ => AEC_ERROR_CONFIG,
    }
}

fn direction(code: c_int) -> Option<Direction> {
    match code {
        AEC_RENDER => Some(Direction::Render),
        AEC_CAPTURE => Some(Direction::Capture),
        _ => None,
    }
}

fn stage(code: c_int) -> Option<Stage> {
    match code {
        AEC_STAGE_INPUT => Some(Stage::Input),
        AEC_STAGE_PROCESSING => Some(Stage::Processing),
        AEC_STAGE_OUTPUT => Some(Stage::Output),
        _ => None,
    }
}

fn rate(code: c_int) -> Option<u32> {
    u32::try_from(code).ok()
}

/// Run `f` on the session behind `handle`, mapping errors and panics to
/// status codes.
unsafe fn with_session<F>(handle: *mut AecSession, f: F) -> c_int
where
    F: FnOnce(&mut AecSession) -> Result<(), c_int>,
{
    // SAFETY: the caller guarantees `handle` is null or came from `aec_create`
    let Some(handle) = (unsafe { handle.as_mut() }) else {
        return AEC_ERROR_NULL;
    };
    match catch_unwind(AssertUnwindSafe(|| f(handle))) {
        Ok(Ok(())) => AEC_OK,
        Ok(Err(code)) => code,
        Err(_) => {
            warn!("panic caught at the C boundary");
            AEC_ERROR_PANIC
        }
    }
}

/// Create a session. Returns null if the parameters are rejected.
#[no_mangle]
pub extern "C" fn aec_create(
    sample_rate: c_int,
    render_channels: usize,
    capture_channels: usize,
) -> *mut AecSession {
    let created = catch_unwind(|| {
        let sample_rate = rate(sample_rate)?;
        let config = SessionConfig::new(sample_rate, render_channels, capture_channels);
        CancellationSession::new(config).ok()
    });
    match created {
        Ok(Some(session)) => Box::into_raw(Box::new(AecSession {
            session,
            channel_tables: HashMap::new(),
        })),
        Ok(None) | Err(_) => ptr::null_mut(),
    }
}

/// Destroy a session.
///
/// # Safety
///
/// `handle` must be null or a pointer returned by [`aec_create`] that has not
/// been freed yet.
#[no_mangle]
pub unsafe extern "C" fn aec_free(handle: *mut AecSession) {
    if !handle.is_null() {
        // SAFETY: ownership returns to Rust exactly once
        let AecSession { session, .. } = *unsafe { Box::from_raw(handle) };
        session.destroy();
    }
}

/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_set_audio_buffer_delay(handle: *mut AecSession, delay_ms: c_int) -> c_int {
    unsafe {
        with_session(handle, |h| {
            h.session.set_delay(delay_ms);
            Ok(())
        })
    }
}

/// (Re)allocate the buffers of one direction: an input stage filled at
/// `in_rate`/`in_channels`, the processing stage at the engine shape, and an
/// output stage at `out_rate`/`out_channels`.
///
/// All pointers previously returned by [`aec_channels`] for this direction
/// become invalid.
///
/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
#[allow(clippy::too_many_arguments)]
pub unsafe extern "C" fn aec_configure(
    handle: *mut AecSession,
    direction_code: c_int,
    in_rate: c_int,
    in_channels: usize,
    proc_rate: c_int,
    proc_channels: usize,
    out_rate: c_int,
    out_channels: usize,
) -> c_int {
    unsafe {
        with_session(handle, |h| {
            let direction = direction(direction_code).ok_or(AEC_ERROR_ARGUMENT)?;
            let shape = |rate_code, channels| {
                rate(rate_code)
                    .map(|rate| StreamShape::new(rate, channels))
                    .ok_or(AEC_ERROR_ARGUMENT)
            };
            let config = PipelineConfig::staged(
                shape(in_rate, in_channels)?,
                shape(proc_rate, proc_channels)?,
                shape(out_rate, out_channels)?,
            );

            h.channel_tables.retain(|(d, _), _| *d != direction);
            h.session
                .configure(direction, config)
                .map_err(|err| status(&err))
        })
    }
}

/// Copy the input stage of a direction into its processing stage.
///
/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_stage_in(handle: *mut AecSession, direction_code: c_int) -> c_int {
    unsafe {
        with_session(handle, |h| {
            let direction = direction(direction_code).ok_or(AEC_ERROR_ARGUMENT)?;
            h.session.stage_in(direction).map_err(|err| status(&err))
        })
    }
}

/// Copy the processing stage of a direction into its output stage.
///
/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_stage_out(handle: *mut AecSession, direction_code: c_int) -> c_int {
    unsafe {
        with_session(handle, |h| {
            let direction = direction(direction_code).ok_or(AEC_ERROR_ARGUMENT)?;
            h.session.stage_out(direction).map_err(|err| status(&err))
        })
    }
}

/// Frames per channel of one stage, or 0 if it does not exist.
///
/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_num_frames(
    handle: *mut AecSession,
    direction_code: c_int,
    stage_code: c_int,
) -> c_uint {
    let mut frames = 0;
    unsafe {
        with_session(handle, |h| {
            let direction = direction(direction_code).ok_or(AEC_ERROR_ARGUMENT)?;
            let stage = stage(stage_code).ok_or(AEC_ERROR_ARGUMENT)?;
            let buffer = h
                .session
                .buffer(direction, stage)
                .map_err(|err| status(&err))?;
            frames = c_uint::try_from(buffer.num_frames()).map_err(|_| AEC_ERROR_CONFIG)?;
            Ok(())
        });
    }
    frames
}

/// An array with one pointer per channel of a stage, each to
/// [`aec_num_frames`] samples. Null if the stage does not exist.
///
/// Valid until the direction is reconfigured or the session is freed.
///
/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_channels(
    handle: *mut AecSession,
    direction_code: c_int,
    stage_code: c_int,
) -> *const *mut f32 {
    let mut table = ptr::null();
    unsafe {
        with_session(handle, |h| {
            let direction = direction(direction_code).ok_or(AEC_ERROR_ARGUMENT)?;
            let stage = stage(stage_code).ok_or(AEC_ERROR_ARGUMENT)?;
            let buffer = h
                .session
                .buffer_mut(direction, stage)
                .map_err(|err| status(&err))?;
            let pointers = h
                .channel_tables
                .entry((direction, stage))
                .or_insert_with(|| buffer.channel_ptrs().collect());
            table = pointers.as_ptr();
            Ok(())
        });
    }
    table
}

/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_split_into_frequency_bands(
    handle: *mut AecSession,
    direction_code: c_int,
    stage_code: c_int,
) -> c_int {
    unsafe {
        with_session(handle, |h| {
            let direction = direction(direction_code).ok_or(AEC_ERROR_ARGUMENT)?;
            let stage = stage(stage_code).ok_or(AEC_ERROR_ARGUMENT)?;
            h.session
                .buffer_mut(direction, stage)
                .and_then(|buffer| buffer.split_into_frequency_bands())
                .map_err(|err| status(&err))
        })
    }
}

/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_merge_frequency_bands(
    handle: *mut AecSession,
    direction_code: c_int,
    stage_code: c_int,
) -> c_int {
    unsafe {
        with_session(handle, |h| {
            let direction = direction(direction_code).ok_or(AEC_ERROR_ARGUMENT)?;
            let stage = stage(stage_code).ok_or(AEC_ERROR_ARGUMENT)?;
            h.session
                .buffer_mut(direction, stage)
                .and_then(|buffer| buffer.merge_frequency_bands())
                .map_err(|err| status(&err))
        })
    }
}

/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_analyze_render(handle: *mut AecSession) -> c_int {
    unsafe { with_session(handle, |h| h.session.analyze_render().map_err(|err| status(&err))) }
}

/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_analyze_capture(handle: *mut AecSession) -> c_int {
    unsafe { with_session(handle, |h| h.session.analyze_capture().map_err(|err| status(&err))) }
}

/// # Safety
///
/// `handle` must be null or a live pointer from [`aec_create`].
#[no_mangle]
pub unsafe extern "C" fn aec_process_capture(handle: *mut AecSession, level_change: c_int) -> c_int {
    unsafe {
        with_session(handle, |h| {
            h.session
                .process_capture(level_change != 0)
                .map_err(|err| status(&err))
        })
    }
}
