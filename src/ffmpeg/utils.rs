//! FFmpeg utility functions
//!
//! All `unsafe` field access lives here; the rest of the backend goes
//! through these safe wrappers.

use ffmpeg_next as ffmpeg;

/// Timebase every video encoder runs in
pub const VIDEO_ENCODER_TIME_BASE: ffmpeg::Rational = ffmpeg::Rational(1, 90000);

/// Convert timestamps from one timebase to another
pub fn rescale_ts(ts: i64, from: ffmpeg::Rational, to: ffmpeg::Rational) -> i64 {
    unsafe { ffmpeg::ffi::av_rescale_q(ts, from.into(), to.into()) }
}

/// `EAGAIN`: the codec needs more input (or output drained) first
pub fn is_again(e: &ffmpeg::Error) -> bool {
    matches!(e, ffmpeg::Error::Other { errno } if *errno == ffmpeg::error::EAGAIN)
}

/// Timestamp in seconds
pub fn ts_to_secs(ts: i64, time_base: ffmpeg::Rational) -> f64 {
    if time_base.denominator() == 0 {
        return 0.0;
    }
    ts as f64 * time_base.numerator() as f64 / time_base.denominator() as f64
}

/// Get frame rate as f64
pub fn framerate_to_f64(framerate: ffmpeg::Rational) -> f64 {
    if framerate.denominator() == 0 {
        0.0
    } else {
        framerate.numerator() as f64 / framerate.denominator() as f64
    }
}

/// Frame rate as a rational with millisecond precision, 25 fps when unknown
pub fn framerate_from_f64(fps: f64) -> ffmpeg::Rational {
    if !fps.is_finite() || fps <= 0.0 {
        return ffmpeg::Rational(25, 1);
    }
    let rounded = fps.round();
    if (fps - rounded).abs() < 1e-3 {
        ffmpeg::Rational(rounded as i32, 1)
    } else {
        ffmpeg::Rational((fps * 1000.0).round() as i32, 1000)
    }
}

/// Read `sample_rate` from an `AVCodecParameters` struct.
pub fn codec_params_sample_rate(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    // SAFETY: `params.as_ptr()` is valid for the lifetime of `params`.
    unsafe { (*params.as_ptr()).sample_rate as u32 }
}

/// Read `ch_layout.nb_channels` from an `AVCodecParameters` struct.
pub fn codec_params_channels(params: &ffmpeg::codec::parameters::Parameters) -> u16 {
    unsafe { (*params.as_ptr()).ch_layout.nb_channels as u16 }
}

/// Read `width` from an `AVCodecParameters` struct.
pub fn codec_params_width(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).width as u32 }
}

/// Read `height` from an `AVCodecParameters` struct.
pub fn codec_params_height(params: &ffmpeg::codec::parameters::Parameters) -> u32 {
    unsafe { (*params.as_ptr()).height as u32 }
}

/// Copy an opened codec context into a fresh `AVCodecParameters`, for
/// muxer stream setup.
pub fn context_codec_parameters(ctx: &ffmpeg::codec::Context) -> ffmpeg::codec::Parameters {
    use std::rc::Rc;
    // SAFETY: `ctx` is a live, opened context; the allocated parameters are
    // owned by the returned wrapper.
    unsafe {
        let params = ffmpeg::ffi::avcodec_parameters_alloc();
        ffmpeg::ffi::avcodec_parameters_from_context(params, ctx.as_ptr());
        ffmpeg::codec::Parameters::wrap(params, None::<Rc<dyn std::any::Any>>)
    }
}

/// Zero out `codec_tag` on an output stream so the muxer picks the tag for
/// the target container. Call after `set_parameters`, before `write_header`.
pub fn stream_reset_codec_tag(out_stream: &mut ffmpeg::format::stream::StreamMut) {
    unsafe {
        (*(*out_stream.as_mut_ptr()).codecpar).codec_tag = 0;
    }
}

/// Force square pixels on an output video frame
pub fn frame_set_square_pixels(frame: &mut ffmpeg::util::frame::Video) {
    unsafe {
        (*frame.as_mut_ptr()).sample_aspect_ratio = ffmpeg::ffi::AVRational { num: 1, den: 1 };
    }
}

/// Check whether the FFmpeg build has an encoder for `codec_id`.
pub fn encoder_available(codec_id: ffmpeg::codec::Id) -> bool {
    ffmpeg::codec::encoder::find(codec_id).is_some()
}
