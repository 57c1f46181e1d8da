//! Image type sniffing and page name ordering shared by the file-based loaders.

use std::cmp::Ordering;
use std::fs::File;
use std::io::Read;
use std::path::Path;

/// Bytes needed to tell the supported formats apart.
pub const SNIFF_LEN: usize = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageType {
    Jpg,
    Png,
    Gif,
    Webp,
}

impl ImageType {
    pub fn mime(self) -> &'static str {
        match self {
            ImageType::Jpg => "image/jpeg",
            ImageType::Png => "image/png",
            ImageType::Gif => "image/gif",
            ImageType::Webp => "image/webp",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            ImageType::Jpg => "jpg",
            ImageType::Png => "png",
            ImageType::Gif => "gif",
            ImageType::Webp => "webp",
        }
    }
}

/// Detect the image type from the leading bytes of a file.
pub fn find_image_type(header: &[u8]) -> Option<ImageType> {
    if header.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some(ImageType::Jpg);
    }
    if header.starts_with(&[0x89, b'P', b'N', b'G']) {
        return Some(ImageType::Png);
    }
    if header.starts_with(b"GIF8") {
        return Some(ImageType::Gif);
    }
    if header.len() >= 12 && header.starts_with(b"RIFF") && &header[8..12] == b"WEBP" {
        return Some(ImageType::Webp);
    }
    None
}

/// Read up to [`SNIFF_LEN`] bytes and sniff them.
pub fn sniff_reader<R: Read>(reader: &mut R) -> std::io::Result<Option<ImageType>> {
    let mut header = [0u8; SNIFF_LEN];
    let mut filled = 0;
    while filled < SNIFF_LEN {
        let n = reader.read(&mut header[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(find_image_type(&header[..filled]))
}

pub fn sniff_file(path: &Path) -> std::io::Result<Option<ImageType>> {
    let mut file = File::open(path)?;
    sniff_reader(&mut file)
}

/// Case-insensitive natural order: digit runs compare as numbers.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    natord::compare_ignore_case(a, b)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_find_image_type() {
        assert_eq!(find_image_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some(ImageType::Jpg));
        assert_eq!(find_image_type(b"\x89PNG\r\n\x1a\n"), Some(ImageType::Png));
        assert_eq!(find_image_type(b"GIF89a"), Some(ImageType::Gif));
        assert_eq!(find_image_type(b"RIFF\0\0\0\0WEBPVP8 "), Some(ImageType::Webp));
    }

    #[test]
    fn test_riff_without_webp_is_not_image() {
        assert_eq!(find_image_type(b"RIFF\0\0\0\0WAVEfmt "), None);
    }

    #[test]
    fn test_text_is_not_image() {
        assert_eq!(find_image_type(b"<?xml version"), None);
        assert_eq!(find_image_type(b""), None);
    }

    #[test]
    fn test_sniff_short_reader() {
        let mut data: &[u8] = b"GIF8";
        assert_eq!(sniff_reader(&mut data).unwrap(), Some(ImageType::Gif));
    }

    #[test]
    fn test_natural_sort() {
        let mut names = vec!["page2.jpg", "page10.jpg", "page1.jpg"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["page1.jpg", "page2.jpg", "page10.jpg"]);
    }

    #[test]
    fn test_natural_sort_ignores_case() {
        let mut names = vec!["B2.png", "a10.png", "a9.png"];
        names.sort_by(|a, b| natural_cmp(a, b));
        assert_eq!(names, vec!["a9.png", "a10.png", "B2.png"]);
    }

    #[test]
    fn test_mime_and_extension() {
        assert_eq!(ImageType::Webp.mime(), "image/webp");
        assert_eq!(ImageType::Jpg.extension(), "jpg");
    }
}
