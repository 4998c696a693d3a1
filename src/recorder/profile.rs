//! Source classification and encoder argument profiles

/// How a stream URI is ingested and encoded.
///
/// Classified once when a recording starts; the protocol never changes for
/// the lifetime of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamProtocol {
    /// rtsp:// source, H.264 copied as-is
    Rtsp,
    /// HTTP source recognized as an MJPEG part stream
    MjpegOverHttp,
    /// Any other http(s):// source
    GenericHttp,
    /// Device nodes, files, everything else
    LocalOrOther,
}

impl StreamProtocol {
    /// Classify a URI by scheme and MJPEG markers ("mjpeg", "mpjpeg", or
    /// the conventional :8081 camera port).
    pub fn classify(uri: &str) -> Self {
        let lower = uri.to_ascii_lowercase();
        if lower.starts_with("rtsp://") {
            StreamProtocol::Rtsp
        } else if lower.starts_with("http://") || lower.starts_with("https://") {
            if lower.contains("mjpeg") || lower.contains("mpjpeg") || lower.contains("8081") {
                StreamProtocol::MjpegOverHttp
            } else {
                StreamProtocol::GenericHttp
            }
        } else {
            StreamProtocol::LocalOrOther
        }
    }

    /// Input-side ffmpeg arguments, ending with `-i <uri>`
    pub fn input_args(&self, uri: &str) -> Vec<String> {
        let mut args: Vec<String> = Vec::new();
        match self {
            StreamProtocol::Rtsp => {
                args.extend(["-rtsp_transport".into(), "tcp".into()]);
            }
            StreamProtocol::MjpegOverHttp => {
                args.extend(["-f".into(), "mjpeg".into()]);
            }
            StreamProtocol::GenericHttp | StreamProtocol::LocalOrOther => {}
        }
        args.extend(["-i".into(), uri.into()]);
        args
    }

    /// Encoder arguments for recording this protocol to MP4.
    ///
    /// RTSP sources carry H.264 already and are stream-copied; MJPEG needs a
    /// full re-encode with an explicit pixel format and frame rate since the
    /// part stream carries neither.
    pub fn encode_args(&self) -> &'static [&'static str] {
        match self {
            StreamProtocol::Rtsp => &["-c:v", "copy", "-c:a", "aac"],
            StreamProtocol::MjpegOverHttp => &[
                "-c:v", "libx264", "-preset", "ultrafast", "-crf", "23", "-pix_fmt", "yuv420p",
                "-r", "25", "-c:a", "aac", "-b:a", "128k",
            ],
            StreamProtocol::GenericHttp | StreamProtocol::LocalOrOther => &[
                "-c:v", "libx264", "-preset", "ultrafast", "-crf", "23", "-c:a", "aac", "-b:a",
                "128k",
            ],
        }
    }
}

/// Full argument list for one recording run, except the trailing output
/// path which the caller appends.
pub fn recording_args(uri: &str, max_duration_secs: u32) -> Vec<String> {
    let protocol = StreamProtocol::classify(uri);
    let mut args = protocol.input_args(uri);
    args.extend(protocol.encode_args().iter().map(|s| s.to_string()));
    args.extend([
        "-movflags".into(),
        "+faststart".into(),
        "-f".into(),
        "mp4".into(),
        "-t".into(),
        max_duration_secs.to_string(),
        "-y".into(),
    ]);
    args
}
