//! Shared GStreamer plumbing.

use std::sync::OnceLock;

use gst::prelude::*;
use gstreamer as gst;
use pipcast_common::error::{PipcastError, PipcastResult};

/// Elements the recording pipelines rely on.
pub const REQUIRED_ELEMENTS: &[&str] = &[
    "appsrc",
    "appsink",
    "videoconvert",
    "vp8enc",
    "webmmux",
    "audioconvert",
    "audioresample",
    "opusenc",
];

/// Elements needed only for live capture.
pub const CAPTURE_ELEMENTS: &[&str] = &["ximagesrc", "v4l2src", "pulsesrc"];

pub(crate) fn init_gstreamer() -> PipcastResult<()> {
    static GST_INIT: OnceLock<Result<(), String>> = OnceLock::new();
    let init_res = GST_INIT.get_or_init(|| gst::init().map_err(|e| e.to_string()));
    match init_res {
        Ok(()) => Ok(()),
        Err(e) => Err(PipcastError::capture(format!(
            "Failed to initialize GStreamer: {e}"
        ))),
    }
}

/// Whether a GStreamer element factory is installed.
pub fn element_available(name: &str) -> PipcastResult<bool> {
    init_gstreamer()?;
    Ok(gst::ElementFactory::find(name).is_some())
}

/// Wait up to `timeout` for `pipeline` to reach Playing.
///
/// A transition still pending at the deadline is logged, not an error.
pub(crate) fn wait_for_playing(
    pipeline: &gst::Pipeline,
    name: &str,
    timeout: gst::ClockTime,
) -> PipcastResult<()> {
    match pipeline.state(timeout) {
        (Ok(_), gst::State::Playing, _) => Ok(()),
        (Ok(_), state, pending) => {
            tracing::debug!(
                pipeline = name,
                ?state,
                ?pending,
                "Pipeline has not reached Playing yet"
            );
            Ok(())
        }
        (Err(e), _, _) => Err(PipcastError::capture(format!(
            "{name} pipeline failed to reach Playing state: {e:?}"
        ))),
    }
}

pub(crate) fn escape_value(value: &str) -> String {
    value.replace('"', "\\\"")
}
