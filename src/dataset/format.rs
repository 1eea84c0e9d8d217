//! Image format sniffing from the first bytes of a file.

/// Bytes read from the head of each file before sniffing
pub const HEADER_LEN: usize = 32;

/// Image formats accepted as input
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Jpeg,
    Png,
    Gif,
}

impl std::fmt::Display for ImageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ImageKind::Jpeg => write!(f, "jpeg"),
            ImageKind::Png => write!(f, "png"),
            ImageKind::Gif => write!(f, "gif"),
        }
    }
}

/// Detect the image format from a header prefix.
///
/// Only the content is inspected, never the file name. Formats outside
/// JPEG/PNG/GIF (and anything unrecognised) yield `None`.
pub fn detect_format(prefix: &[u8]) -> Option<ImageKind> {
    match image::guess_format(prefix).ok()? {
        image::ImageFormat::Jpeg => Some(ImageKind::Jpeg),
        image::ImageFormat::Png => Some(ImageKind::Png),
        image::ImageFormat::Gif => Some(ImageKind::Gif),
        _ => None,
    }
}
