//! Epub chapters: the page order is the book's spine order and, inside
//! each spine document, the order images appear in the markup.
//!
//! ```text
//! META-INF/container.xml → rootfile full-path → package document
//!   manifest (id → href, media-type) + spine (idref…)
//!     → XHTML documents in spine order → <img src> / <image href>
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;

use crate::app::{ReaderError, Result};
use crate::domain::{EntryReader, Page, PageData, PageStatus};
use crate::loader::archive::ZipHandle;
use crate::loader::{local_page_status, non_empty, PageLoader, RecycleFlag};

const CONTAINER_PATH: &str = "META-INF/container.xml";
const DEFAULT_PACKAGE_PATH: &str = "OEBPS/content.opf";
const XHTML_MEDIA_TYPE: &str = "application/xhtml+xml";

pub struct EpubPageLoader {
    handle: Arc<ZipHandle>,
    recycled: RecycleFlag,
}

impl EpubPageLoader {
    pub fn open(path: &Path) -> Result<Self> {
        Ok(Self {
            handle: Arc::new(ZipHandle::open(path)?),
            recycled: RecycleFlag::default(),
        })
    }
}

#[async_trait]
impl PageLoader for EpubPageLoader {
    fn name(&self) -> &'static str {
        "epub"
    }

    async fn get_pages(&self) -> Result<Vec<Arc<Page>>> {
        self.recycled.check()?;
        let handle = self.handle.clone();
        let paths = tokio::task::spawn_blocking(move || image_paths(&handle)).await??;

        let reader: Arc<dyn EntryReader> = self.handle.clone();
        let pages = paths
            .into_iter()
            .enumerate()
            .map(|(i, path)| {
                let data = PageData::Entry {
                    reader: reader.clone(),
                    name: path.clone(),
                };
                Arc::new(Page::ready(i, Some(path), data))
            })
            .collect();

        non_empty(pages)
    }

    async fn get_page(&self, _page: &Arc<Page>) -> PageStatus {
        local_page_status(&self.recycled)
    }

    fn recycle(&self) {
        if self.recycled.recycle() {
            self.handle.close();
        }
    }

    fn is_recycled(&self) -> bool {
        self.recycled.is_recycled()
    }
}

/// Archive paths of every image, in reading order.
fn image_paths(handle: &ZipHandle) -> Result<Vec<String>> {
    let entries = handle.file_names()?;

    let package_path = if entries.contains(CONTAINER_PATH) {
        let container = handle.read_entry(CONTAINER_PATH)?;
        parse_container(&container)?.unwrap_or_else(|| DEFAULT_PACKAGE_PATH.to_string())
    } else {
        DEFAULT_PACKAGE_PATH.to_string()
    };

    let package = handle.read_entry(&package_path).map_err(|e| match e {
        ReaderError::CorruptArchive(_) => {
            ReaderError::CorruptArchive(format!("Missing package document {}", package_path))
        }
        other => other,
    })?;
    let documents = parse_package(&package)?;
    let package_dir = parent_dir(&package_path);

    let mut images = Vec::new();
    for href in documents {
        let doc_path = resolve_href(package_dir, &href);
        if !entries.contains(&doc_path) {
            tracing::warn!("Spine document {} missing from epub", doc_path);
            continue;
        }
        let xhtml = handle.read_entry(&doc_path)?;
        let doc_dir = parent_dir(&doc_path);
        for src in parse_image_refs(&xhtml)? {
            let image_path = resolve_href(doc_dir, &src);
            if entries.contains(&image_path) {
                images.push(image_path);
            } else {
                tracing::debug!("Image {} referenced by {} not found", image_path, doc_path);
            }
        }
    }

    Ok(images)
}

/// `full-path` of the first `rootfile` in container.xml.
fn parse_container(content: &[u8]) -> Result<Option<String>> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                if e.local_name().as_ref() == b"rootfile" {
                    if let Some(path) = attribute(&reader, &e, b"full-path")? {
                        return Ok(Some(path));
                    }
                }
            }
            Event::Eof => return Ok(None),
            _ => {}
        }
        buf.clear();
    }
}

/// Hrefs of the XHTML documents named by the spine, in spine order.
fn parse_package(content: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut manifest: HashMap<String, (String, String)> = HashMap::new();
    let mut spine: Vec<String> = Vec::new();
    let mut in_manifest = false;
    let mut in_spine = false;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => match e.local_name().as_ref() {
                b"manifest" => in_manifest = true,
                b"spine" => in_spine = true,
                b"item" if in_manifest => {
                    let id = attribute(&reader, &e, b"id")?;
                    let href = attribute(&reader, &e, b"href")?;
                    let media_type = attribute(&reader, &e, b"media-type")?.unwrap_or_default();
                    if let (Some(id), Some(href)) = (id, href) {
                        manifest.insert(id, (href, media_type));
                    }
                }
                b"itemref" if in_spine => {
                    if let Some(idref) = attribute(&reader, &e, b"idref")? {
                        spine.push(idref);
                    }
                }
                _ => {}
            },
            Event::End(e) => match e.local_name().as_ref() {
                b"manifest" => in_manifest = false,
                b"spine" => in_spine = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(spine
        .into_iter()
        .filter_map(|idref| match manifest.get(&idref) {
            Some((href, media_type)) if media_type == XHTML_MEDIA_TYPE => Some(href.clone()),
            Some(_) => None,
            None => {
                tracing::warn!("Spine item '{}' does not exist in manifest", idref);
                None
            }
        })
        .collect())
}

/// Image references of one XHTML document in document order: `<img src>`
/// and SVG `<image href>` / `<image xlink:href>`.
fn parse_image_refs(content: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(content);
    let config = reader.config_mut();
    config.trim_text(true);
    config.check_end_names = false;
    let mut buf = Vec::new();
    let mut refs = Vec::new();

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::Start(e) | Event::Empty(e) => {
                let src = match e.local_name().as_ref() {
                    b"img" => attribute(&reader, &e, b"src")?,
                    b"image" => attribute(&reader, &e, b"href")?,
                    _ => None,
                };
                if let Some(src) = src.filter(|s| !s.is_empty()) {
                    refs.push(src);
                }
            }
            Event::Eof => break,
            _ => {}
        }
        buf.clear();
    }

    Ok(refs)
}

/// Value of the attribute whose local name is `key`; namespace prefixes
/// such as `xlink:` are ignored.
fn attribute(reader: &Reader<&[u8]>, e: &BytesStart<'_>, key: &[u8]) -> Result<Option<String>> {
    for attr in e.attributes().with_checks(false) {
        let attr = attr.map_err(|e| ReaderError::CorruptArchive(format!("Attr error: {:?}", e)))?;
        if attr.key.local_name().as_ref() == key {
            let value = reader
                .decoder()
                .decode(&attr.value)
                .map_err(|e| ReaderError::CorruptArchive(format!("Decode error: {:?}", e)))?;
            return Ok(Some(value.into_owned()));
        }
    }
    Ok(None)
}

fn parent_dir(path: &str) -> &str {
    path.rfind('/').map(|i| &path[..i]).unwrap_or("")
}

/// Resolve a relative href against an archive directory, dropping any
/// fragment or query and collapsing `.` and `..` segments.
fn resolve_href(base_dir: &str, href: &str) -> String {
    let href = href.split(['#', '?']).next().unwrap_or("");
    let mut segments: Vec<&str> = Vec::new();

    let joined: Vec<&str> = if let Some(absolute) = href.strip_prefix('/') {
        absolute.split('/').collect()
    } else {
        base_dir.split('/').chain(href.split('/')).collect()
    };

    for segment in joined {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }

    segments.join("/")
}
