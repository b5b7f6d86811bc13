//! Streaming manifest driver: a push state machine fed by [`crate::lax_json`]
//! events. Each state owns only the scratch it needs (a tagged variant per
//! context), unlike a flat enum with module-global scratch slots; closing a
//! nested object/array folds its finished value back into the parent frame
//! on the stack.

use crate::bundle::Bundle;
use crate::error::{Result, RuckError};
use crate::image_codec;
use crate::lax_json::{Event, Located, Tokenizer};
use crate::pack::{self, Constraints, PackRect};
use crate::path_safety::{self, PathPolicy};
use crate::path_util;
use crate::texture::{Anchor, Image as PackedImage, Page, Texture};
use globset::Glob;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

#[derive(Debug, Clone)]
pub struct ImageSpec {
    pub path: String,
    pub anchor: Anchor,
}

impl Default for ImageSpec {
    fn default() -> Self {
        ImageSpec { path: String::new(), anchor: Anchor::Center }
    }
}

#[derive(Debug, Clone)]
pub struct GlobSpec {
    pub glob: String,
    pub path: String,
    pub prefix: String,
}

impl Default for GlobSpec {
    fn default() -> Self {
        GlobSpec { glob: "*".into(), path: String::new(), prefix: String::new() }
    }
}

#[derive(Debug, Clone, Default)]
pub struct GlobImageSpec {
    pub glob: GlobSpec,
    pub anchor: Option<Anchor>,
}

#[derive(Debug, Clone, Default)]
pub struct FileSpec {
    pub path: String,
}

#[derive(Debug, Clone)]
pub struct TextureSpec {
    pub max_width: u32,
    pub max_height: u32,
    pub pow2: bool,
    pub allow_r90: bool,
    pub images: Vec<(String, ImageSpec)>,
    pub glob_images: Vec<GlobImageSpec>,
}

impl Default for TextureSpec {
    fn default() -> Self {
        TextureSpec {
            max_width: 1024,
            max_height: 1024,
            pow2: true,
            allow_r90: true,
            images: Vec::new(),
            glob_images: Vec::new(),
        }
    }
}

/// Whether a status event concerns a file or a texture entry, so a CLI
/// printing "New file: x" vs "New texture: x" doesn't need to guess.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCategory {
    File,
    Texture,
}

/// What happened to one manifest entry, surfaced to callers that want to
/// print progress; the driver itself never formats or localizes text.
pub enum StatusEvent<'a> {
    New { key: &'a str, category: EntryCategory },
    Updated { key: &'a str, category: EntryCategory },
    UpToDate { key: &'a str, category: EntryCategory },
}

fn anchor_from_name(name: &str) -> Result<Anchor> {
    Ok(match name {
        "center" => Anchor::Center,
        "top" => Anchor::Top,
        "right" => Anchor::Right,
        "bottom" => Anchor::Bottom,
        "left" => Anchor::Left,
        "topleft" => Anchor::TopLeft,
        "topright" => Anchor::TopRight,
        "bottomleft" => Anchor::BottomLeft,
        "bottomright" => Anchor::BottomRight,
        other => return Err(RuckError::BadFormat(format!("unknown anchor name '{other}'"))),
    })
}

struct MapState<T> {
    items: Vec<(String, T)>,
    pending_key: Option<String>,
}

impl<T> MapState<T> {
    fn new() -> Self {
        MapState { items: Vec::new(), pending_key: None }
    }
}

#[derive(Default)]
enum TopExpect {
    #[default]
    PropName,
    TexturesBegin,
    FilesBegin,
    GlobFilesBegin,
}

struct TopState {
    expect: TopExpect,
}

#[derive(Default)]
enum TextureProp {
    #[default]
    PropName,
    MaxWidth,
    MaxHeight,
    Pow2,
    AllowR90,
    ImagesBegin,
    GlobImagesBegin,
}

struct TextureObjState {
    key: String,
    spec: TextureSpec,
    expect: TextureProp,
}

#[derive(Default)]
enum ImageProp {
    #[default]
    PropName,
    Path,
    Anchor,
}

struct ImageObjState {
    key: String,
    spec: ImageSpec,
    expect: ImageProp,
}

#[derive(Default)]
enum AnchorProp {
    #[default]
    PropName,
    X,
    Y,
}

struct AnchorObjState {
    x: f64,
    y: f64,
    expect: AnchorProp,
}

#[derive(Default)]
enum GlobProp {
    #[default]
    PropName,
    Glob,
    Path,
    Prefix,
}

struct GlobFileObjState {
    spec: GlobSpec,
    expect: GlobProp,
}

#[derive(Default)]
enum GlobImageProp {
    #[default]
    PropName,
    Glob,
    Path,
    Prefix,
    Anchor,
}

struct GlobImageObjState {
    spec: GlobImageSpec,
    expect: GlobImageProp,
}

#[derive(Default)]
enum FileProp {
    #[default]
    PropName,
    Path,
}

struct FileObjState {
    key: String,
    spec: FileSpec,
    expect: FileProp,
}

enum Frame {
    Top(TopState),
    TexturesMap(MapState<TextureSpec>),
    TextureObj(TextureObjState),
    ImagesMap(MapState<ImageSpec>),
    ImageObj(ImageObjState),
    AnchorObj(AnchorObjState),
    GlobImagesArr(Vec<GlobImageSpec>),
    GlobImageObj(GlobImageObjState),
    FilesMap(MapState<FileSpec>),
    FileObj(FileObjState),
    GlobFilesArr(Vec<GlobSpec>),
    GlobFileObj(GlobFileObjState),
}

/// Drives a [`Bundle`] from a streamed lenient-JSON manifest.
pub struct ManifestDriver<'a> {
    bundle: &'a mut Bundle,
    prefix_cli: PathBuf,
    tokenizer: Tokenizer,
    stack: Vec<Frame>,
    done: bool,
}

impl<'a> ManifestDriver<'a> {
    pub fn new(bundle: &'a mut Bundle, prefix_cli: impl Into<PathBuf>) -> Self {
        ManifestDriver {
            bundle,
            prefix_cli: prefix_cli.into(),
            tokenizer: Tokenizer::new(),
            stack: vec![Frame::Top(TopState { expect: TopExpect::PropName })],
            done: false,
        }
    }

    /// Feed one chunk of manifest bytes, driving the bundle as entries complete.
    pub fn feed(&mut self, bytes: &[u8], on_status: &mut dyn FnMut(StatusEvent)) -> Result<()> {
        self.tokenizer.feed(bytes)?;
        self.drain(on_status)
    }

    /// Signal end of manifest input; verifies the top-level object closed.
    pub fn finish(&mut self) -> Result<()> {
        self.tokenizer.eof()?;
        let mut dummy = |_: StatusEvent| {};
        self.drain(&mut dummy)?;
        if !self.done || self.stack.len() != 1 {
            return Err(RuckError::Parse {
                line: 0,
                col: 0,
                message: "manifest ended before top-level object closed".into(),
            });
        }
        Ok(())
    }

    fn drain(&mut self, on_status: &mut dyn FnMut(StatusEvent)) -> Result<()> {
        while let Some(located) = self.tokenizer.next_event() {
            self.dispatch(located, on_status)?;
        }
        Ok(())
    }

    /// Pop the current frame, apply one event to it, and push back whatever
    /// the new top of stack should be (the same frame, a child frame on top
    /// of it, or nothing if the frame closed and its contents were folded
    /// into what is now the top).
    fn dispatch(&mut self, located: Located, on_status: &mut dyn FnMut(StatusEvent)) -> Result<()> {
        let Located { event, line, col } = located;
        let perr = |msg: &str| RuckError::Parse { line, col, message: msg.to_string() };
        let frame = self.stack.pop().expect("stack never empties while parsing");

        match frame {
            Frame::Top(mut state) => {
                match (&state.expect, &event) {
                    (TopExpect::PropName, Event::String(name)) => {
                        state.expect = match name.as_str() {
                            "textures" => TopExpect::TexturesBegin,
                            "files" => TopExpect::FilesBegin,
                            "globFiles" => TopExpect::GlobFilesBegin,
                            other => return Err(perr(&format!("unknown top-level property '{other}'"))),
                        };
                        self.stack.push(Frame::Top(state));
                    }
                    (TopExpect::PropName, Event::EndObject) => {
                        self.done = true;
                        self.stack.push(Frame::Top(state));
                    }
                    (TopExpect::TexturesBegin, Event::BeginObject) => {
                        state.expect = TopExpect::PropName;
                        self.stack.push(Frame::Top(state));
                        self.stack.push(Frame::TexturesMap(MapState::new()));
                    }
                    (TopExpect::FilesBegin, Event::BeginObject) => {
                        state.expect = TopExpect::PropName;
                        self.stack.push(Frame::Top(state));
                        self.stack.push(Frame::FilesMap(MapState::new()));
                    }
                    (TopExpect::GlobFilesBegin, Event::BeginArray) => {
                        state.expect = TopExpect::PropName;
                        self.stack.push(Frame::Top(state));
                        self.stack.push(Frame::GlobFilesArr(Vec::new()));
                    }
                    _ => return Err(perr("unexpected token at top level")),
                }
            }

            Frame::TexturesMap(mut map) => match (map.pending_key.take(), event) {
                (None, Event::String(key)) => {
                    map.pending_key = Some(key);
                    self.stack.push(Frame::TexturesMap(map));
                }
                (None, Event::EndObject) => {
                    self.run_textures(map.items, on_status)?;
                }
                (Some(key), Event::BeginObject) => {
                    self.stack.push(Frame::TexturesMap(map));
                    self.stack.push(Frame::TextureObj(TextureObjState {
                        key,
                        spec: TextureSpec::default(),
                        expect: TextureProp::PropName,
                    }));
                }
                (pending, _) => {
                    map.pending_key = pending;
                    self.stack.push(Frame::TexturesMap(map));
                    return Err(perr("expected a texture key or '}'"));
                }
            },

            Frame::TextureObj(mut state) => match (&state.expect, event) {
                (TextureProp::PropName, Event::String(name)) => {
                    state.expect = match name.as_str() {
                        "maxWidth" => TextureProp::MaxWidth,
                        "maxHeight" => TextureProp::MaxHeight,
                        "pow2" => TextureProp::Pow2,
                        "allowRotate90" => TextureProp::AllowR90,
                        "images" => TextureProp::ImagesBegin,
                        "globImages" => TextureProp::GlobImagesBegin,
                        other => return Err(perr(&format!("unknown texture property '{other}'"))),
                    };
                    self.stack.push(Frame::TextureObj(state));
                }
                (TextureProp::PropName, Event::EndObject) => {
                    match self.stack.last_mut() {
                        Some(Frame::TexturesMap(map)) => map.items.push((state.key, state.spec)),
                        _ => unreachable!("texture object always nests under a textures map"),
                    }
                }
                (TextureProp::MaxWidth, Event::Number(n)) => {
                    state.spec.max_width = n as u32;
                    state.expect = TextureProp::PropName;
                    self.stack.push(Frame::TextureObj(state));
                }
                (TextureProp::MaxHeight, Event::Number(n)) => {
                    state.spec.max_height = n as u32;
                    state.expect = TextureProp::PropName;
                    self.stack.push(Frame::TextureObj(state));
                }
                (TextureProp::Pow2, Event::Bool(b)) => {
                    state.spec.pow2 = b;
                    state.expect = TextureProp::PropName;
                    self.stack.push(Frame::TextureObj(state));
                }
                (TextureProp::AllowR90, Event::Bool(b)) => {
                    state.spec.allow_r90 = b;
                    state.expect = TextureProp::PropName;
                    self.stack.push(Frame::TextureObj(state));
                }
                (TextureProp::ImagesBegin, Event::BeginObject) => {
                    self.stack.push(Frame::TextureObj(state));
                    self.stack.push(Frame::ImagesMap(MapState::new()));
                }
                (TextureProp::GlobImagesBegin, Event::BeginArray) => {
                    self.stack.push(Frame::TextureObj(state));
                    self.stack.push(Frame::GlobImagesArr(Vec::new()));
                }
                _ => {
                    self.stack.push(Frame::TextureObj(state));
                    return Err(perr("unexpected token in texture object"));
                }
            },

            Frame::ImagesMap(mut map) => match (map.pending_key.take(), event) {
                (None, Event::String(key)) => {
                    map.pending_key = Some(key);
                    self.stack.push(Frame::ImagesMap(map));
                }
                (None, Event::EndObject) => match self.stack.last_mut() {
                    Some(Frame::TextureObj(parent)) => {
                        parent.spec.images = map.items;
                        parent.expect = TextureProp::PropName;
                    }
                    _ => unreachable!("images map always nests under a texture object"),
                },
                (Some(key), Event::BeginObject) => {
                    self.stack.push(Frame::ImagesMap(map));
                    self.stack.push(Frame::ImageObj(ImageObjState {
                        key,
                        spec: ImageSpec::default(),
                        expect: ImageProp::PropName,
                    }));
                }
                (pending, _) => {
                    map.pending_key = pending;
                    self.stack.push(Frame::ImagesMap(map));
                    return Err(perr("expected an image key or '}'"));
                }
            },

            Frame::ImageObj(mut state) => match (&state.expect, event) {
                (ImageProp::PropName, Event::String(name)) => {
                    state.expect = match name.as_str() {
                        "path" => ImageProp::Path,
                        "anchor" => ImageProp::Anchor,
                        other => return Err(perr(&format!("unknown image property '{other}'"))),
                    };
                    self.stack.push(Frame::ImageObj(state));
                }
                (ImageProp::PropName, Event::EndObject) => match self.stack.last_mut() {
                    Some(Frame::ImagesMap(map)) => map.items.push((state.key, state.spec)),
                    _ => unreachable!("image object always nests under an images map"),
                },
                (ImageProp::Path, Event::String(s)) => {
                    state.spec.path = s;
                    state.expect = ImageProp::PropName;
                    self.stack.push(Frame::ImageObj(state));
                }
                (ImageProp::Anchor, Event::String(s)) => {
                    state.spec.anchor = anchor_from_name(&s)?;
                    state.expect = ImageProp::PropName;
                    self.stack.push(Frame::ImageObj(state));
                }
                (ImageProp::Anchor, Event::BeginObject) => {
                    self.stack.push(Frame::ImageObj(state));
                    self.stack.push(Frame::AnchorObj(AnchorObjState { x: 0.0, y: 0.0, expect: AnchorProp::PropName }));
                }
                _ => {
                    self.stack.push(Frame::ImageObj(state));
                    return Err(perr("unexpected token in image object"));
                }
            },

            Frame::AnchorObj(mut state) => match (&state.expect, event) {
                (AnchorProp::PropName, Event::String(name)) => {
                    state.expect = match name.as_str() {
                        "x" => AnchorProp::X,
                        "y" => AnchorProp::Y,
                        other => return Err(perr(&format!("unknown anchor property '{other}'"))),
                    };
                    self.stack.push(Frame::AnchorObj(state));
                }
                (AnchorProp::PropName, Event::EndObject) => {
                    let anchor = Anchor::Explicit(state.x as f32, state.y as f32);
                    match self.stack.last_mut() {
                        Some(Frame::ImageObj(parent)) => {
                            parent.spec.anchor = anchor;
                            parent.expect = ImageProp::PropName;
                        }
                        Some(Frame::GlobImageObj(parent)) => {
                            parent.spec.anchor = Some(anchor);
                            parent.expect = GlobImageProp::PropName;
                        }
                        _ => return Err(perr("anchor object in unexpected context")),
                    }
                }
                (AnchorProp::X, Event::Number(n)) => {
                    state.x = n;
                    state.expect = AnchorProp::PropName;
                    self.stack.push(Frame::AnchorObj(state));
                }
                (AnchorProp::Y, Event::Number(n)) => {
                    state.y = n;
                    state.expect = AnchorProp::PropName;
                    self.stack.push(Frame::AnchorObj(state));
                }
                _ => {
                    self.stack.push(Frame::AnchorObj(state));
                    return Err(perr("unexpected token in anchor object"));
                }
            },

            Frame::GlobImagesArr(items) => match event {
                Event::BeginObject => {
                    self.stack.push(Frame::GlobImagesArr(items));
                    self.stack.push(Frame::GlobImageObj(GlobImageObjState {
                        spec: GlobImageSpec::default(),
                        expect: GlobImageProp::PropName,
                    }));
                }
                Event::EndArray => match self.stack.last_mut() {
                    Some(Frame::TextureObj(parent)) => {
                        parent.spec.glob_images = items;
                        parent.expect = TextureProp::PropName;
                    }
                    _ => unreachable!("globImages array always nests under a texture object"),
                },
                _ => {
                    self.stack.push(Frame::GlobImagesArr(items));
                    return Err(perr("expected a glob-image object or ']'"));
                }
            },

            Frame::GlobImageObj(mut state) => match (&state.expect, event) {
                (GlobImageProp::PropName, Event::String(name)) => {
                    state.expect = match name.as_str() {
                        "glob" => GlobImageProp::Glob,
                        "path" => GlobImageProp::Path,
                        "prefix" => GlobImageProp::Prefix,
                        "anchor" => GlobImageProp::Anchor,
                        other => return Err(perr(&format!("unknown glob-image property '{other}'"))),
                    };
                    self.stack.push(Frame::GlobImageObj(state));
                }
                (GlobImageProp::PropName, Event::EndObject) => match self.stack.last_mut() {
                    Some(Frame::GlobImagesArr(items)) => items.push(state.spec),
                    _ => unreachable!("glob-image object always nests under a globImages array"),
                },
                (GlobImageProp::Glob, Event::String(s)) => {
                    state.spec.glob.glob = s;
                    state.expect = GlobImageProp::PropName;
                    self.stack.push(Frame::GlobImageObj(state));
                }
                (GlobImageProp::Path, Event::String(s)) => {
                    state.spec.glob.path = s;
                    state.expect = GlobImageProp::PropName;
                    self.stack.push(Frame::GlobImageObj(state));
                }
                (GlobImageProp::Prefix, Event::String(s)) => {
                    state.spec.glob.prefix = s;
                    state.expect = GlobImageProp::PropName;
                    self.stack.push(Frame::GlobImageObj(state));
                }
                (GlobImageProp::Anchor, Event::String(s)) => {
                    state.spec.anchor = Some(anchor_from_name(&s)?);
                    state.expect = GlobImageProp::PropName;
                    self.stack.push(Frame::GlobImageObj(state));
                }
                (GlobImageProp::Anchor, Event::BeginObject) => {
                    self.stack.push(Frame::GlobImageObj(state));
                    self.stack.push(Frame::AnchorObj(AnchorObjState { x: 0.0, y: 0.0, expect: AnchorProp::PropName }));
                }
                _ => {
                    self.stack.push(Frame::GlobImageObj(state));
                    return Err(perr("unexpected token in glob-image object"));
                }
            },

            Frame::FilesMap(mut map) => match (map.pending_key.take(), event) {
                (None, Event::String(key)) => {
                    map.pending_key = Some(key);
                    self.stack.push(Frame::FilesMap(map));
                }
                (None, Event::EndObject) => {
                    self.run_files(map.items, on_status)?;
                }
                (Some(key), Event::BeginObject) => {
                    self.stack.push(Frame::FilesMap(map));
                    self.stack.push(Frame::FileObj(FileObjState {
                        key,
                        spec: FileSpec::default(),
                        expect: FileProp::PropName,
                    }));
                }
                (pending, _) => {
                    map.pending_key = pending;
                    self.stack.push(Frame::FilesMap(map));
                    return Err(perr("expected a file key or '}'"));
                }
            },

            Frame::FileObj(mut state) => match (&state.expect, event) {
                (FileProp::PropName, Event::String(name)) if name == "path" => {
                    state.expect = FileProp::Path;
                    self.stack.push(Frame::FileObj(state));
                }
                (FileProp::PropName, Event::EndObject) => match self.stack.last_mut() {
                    Some(Frame::FilesMap(map)) => map.items.push((state.key, state.spec)),
                    _ => unreachable!("file object always nests under a files map"),
                },
                (FileProp::Path, Event::String(s)) => {
                    state.spec.path = s;
                    state.expect = FileProp::PropName;
                    self.stack.push(Frame::FileObj(state));
                }
                _ => {
                    self.stack.push(Frame::FileObj(state));
                    return Err(perr("unexpected token in file object"));
                }
            },

            Frame::GlobFilesArr(items) => match event {
                Event::BeginObject => {
                    self.stack.push(Frame::GlobFilesArr(items));
                    self.stack.push(Frame::GlobFileObj(GlobFileObjState {
                        spec: GlobSpec::default(),
                        expect: GlobProp::PropName,
                    }));
                }
                Event::EndArray => {
                    self.run_glob_files(items, on_status)?;
                }
                _ => {
                    self.stack.push(Frame::GlobFilesArr(items));
                    return Err(perr("expected a glob-file object or ']'"));
                }
            },

            Frame::GlobFileObj(mut state) => match (&state.expect, event) {
                (GlobProp::PropName, Event::String(name)) => {
                    state.expect = match name.as_str() {
                        "glob" => GlobProp::Glob,
                        "path" => GlobProp::Path,
                        "prefix" => GlobProp::Prefix,
                        other => return Err(perr(&format!("unknown glob property '{other}'"))),
                    };
                    self.stack.push(Frame::GlobFileObj(state));
                }
                (GlobProp::PropName, Event::EndObject) => match self.stack.last_mut() {
                    Some(Frame::GlobFilesArr(items)) => items.push(state.spec),
                    _ => unreachable!("glob-file object always nests under a globFiles array"),
                },
                (GlobProp::Glob, Event::String(s)) => {
                    state.spec.glob = s;
                    state.expect = GlobProp::PropName;
                    self.stack.push(Frame::GlobFileObj(state));
                }
                (GlobProp::Path, Event::String(s)) => {
                    state.spec.path = s;
                    state.expect = GlobProp::PropName;
                    self.stack.push(Frame::GlobFileObj(state));
                }
                (GlobProp::Prefix, Event::String(s)) => {
                    state.spec.prefix = s;
                    state.expect = GlobProp::PropName;
                    self.stack.push(Frame::GlobFileObj(state));
                }
                _ => {
                    self.stack.push(Frame::GlobFileObj(state));
                    return Err(perr("unexpected token in glob-file object"));
                }
            },
        }
        Ok(())
    }

    fn run_textures(&mut self, textures: Vec<(String, TextureSpec)>, on_status: &mut dyn FnMut(StatusEvent)) -> Result<()> {
        for (key, spec) in textures {
            self.build_and_add_texture(&key, spec, on_status)?;
        }
        Ok(())
    }

    fn run_files(&mut self, files: Vec<(String, FileSpec)>, on_status: &mut dyn FnMut(StatusEvent)) -> Result<()> {
        for (key, spec) in files {
            let src = resolve_manifest_path(&self.prefix_cli, &spec.path)?;
            self.add_file_if_outdated(&key, &src, on_status)?;
        }
        Ok(())
    }

    fn run_glob_files(&mut self, globs: Vec<GlobSpec>, on_status: &mut dyn FnMut(StatusEvent)) -> Result<()> {
        for g in globs {
            let matches = expand_glob(&self.prefix_cli, &g)?;
            for (key, path) in matches {
                self.add_file_if_outdated(&key, &path, on_status)?;
            }
        }
        Ok(())
    }

    fn add_file_if_outdated(&mut self, key: &str, src: &Path, on_status: &mut dyn FnMut(StatusEvent)) -> Result<()> {
        let meta = std::fs::metadata(src).map_err(|source| RuckError::Io { path: src.to_path_buf(), source })?;
        let mtime = mtime_secs(&meta);
        let existed = if let Some(existing) = self.bundle.find(key) {
            if existing.mtime >= mtime {
                on_status(StatusEvent::UpToDate { key, category: EntryCategory::File });
                return Ok(());
            }
            true
        } else {
            false
        };
        self.bundle.add_file(key, src, mtime)?;
        on_status(if existed {
            StatusEvent::Updated { key, category: EntryCategory::File }
        } else {
            StatusEvent::New { key, category: EntryCategory::File }
        });
        Ok(())
    }

    fn build_and_add_texture(&mut self, key: &str, spec: TextureSpec, on_status: &mut dyn FnMut(StatusEvent)) -> Result<()> {
        let mut images: Vec<(String, ImageSpec)> = spec.images.clone();
        for g in &spec.glob_images {
            let matches = expand_glob(&self.prefix_cli, &g.glob)?;
            for (gkey, path) in matches {
                let anchor = g.anchor.unwrap_or(Anchor::Center);
                images.push((gkey, ImageSpec { path: path.to_string_lossy().into_owned(), anchor }));
            }
        }
        images.sort_by(|a, b| a.0.cmp(&b.0));

        let mut latest_mtime: u64 = 0;
        let mut decoded = Vec::with_capacity(images.len());
        for (img_key, img_spec) in &images {
            let path = resolve_manifest_path(&self.prefix_cli, &img_spec.path)?;
            let meta = std::fs::metadata(&path).map_err(|source| RuckError::Io { path: path.clone(), source })?;
            latest_mtime = latest_mtime.max(mtime_secs(&meta));
            let decoded_image = image_codec::decode_file(&path)?;
            decoded.push((img_key.clone(), img_spec.anchor, path, decoded_image));
        }

        let existed = self.bundle.find(key).is_some();
        if let Some(existing) = self.bundle.find(key) {
            if existing.mtime >= latest_mtime {
                if let Ok(existing_tex) = self.bundle.file_open_texture(existing) {
                    if existing_tex.max_width == spec.max_width
                        && existing_tex.max_height == spec.max_height
                        && existing_tex.pow2 == spec.pow2
                        && existing_tex.allow_r90 == spec.allow_r90
                    {
                        on_status(StatusEvent::UpToDate { key, category: EntryCategory::Texture });
                        return Ok(());
                    }
                }
            }
        }

        let rects: Vec<PackRect> = decoded
            .iter()
            .map(|(k, _, _, d)| PackRect { key: k.clone(), w: d.width, h: d.height })
            .collect();
        let constraints =
            Constraints { max_w: spec.max_width, max_h: spec.max_height, pow2: spec.pow2, allow_r90: spec.allow_r90 };
        let packed = pack::pack(&rects, constraints)?;

        let mut page_sprites: Vec<Vec<(u32, u32, bool, &image::RgbaImage)>> = vec![Vec::new(); packed.pages.len()];
        for (placement, (_, _, _, decoded_image)) in packed.placements.iter().zip(decoded.iter()) {
            page_sprites[placement.page_index].push((placement.x, placement.y, placement.rotated, &decoded_image.rgba));
        }

        let mut pages = Vec::with_capacity(packed.pages.len());
        for (dims, sprites) in packed.pages.iter().zip(page_sprites.iter()) {
            let canvas = image_codec::compose_page(dims.width, dims.height, sprites)?;
            let encoded = image_codec::encode_png(&canvas)?;
            pages.push(Page { width: dims.width, height: dims.height, encoded });
        }

        let mut out_images = Vec::with_capacity(decoded.len());
        for (placement, (img_key, anchor, path, decoded_image)) in packed.placements.iter().zip(decoded.into_iter()) {
            out_images.push(PackedImage {
                key: img_key,
                path,
                width: decoded_image.width,
                height: decoded_image.height,
                anchor,
                placement: Some(crate::texture::Placement {
                    page_index: placement.page_index as u32,
                    x: placement.x,
                    y: placement.y,
                    rotated: placement.rotated,
                }),
            });
        }

        let texture = Texture {
            max_width: spec.max_width,
            max_height: spec.max_height,
            pow2: spec.pow2,
            allow_r90: spec.allow_r90,
            images: out_images,
            pages,
        };

        self.bundle.add_texture(key, &texture, latest_mtime)?;
        on_status(if existed {
            StatusEvent::Updated { key, category: EntryCategory::Texture }
        } else {
            StatusEvent::New { key, category: EntryCategory::Texture }
        });
        Ok(())
    }
}

fn mtime_secs(meta: &std::fs::Metadata) -> u64 {
    meta.modified()
        .ok()
        .and_then(|m| m.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Expand a glob spec against the filesystem, sorted lexicographically, with
/// keys built as `prefix || relative_path`.
fn resolve_manifest_path(prefix_cli: &Path, rel: &str) -> Result<PathBuf> {
    path_safety::validate_path(prefix_cli, Path::new(rel), PathPolicy::default())
}

fn expand_glob(prefix_cli: &Path, spec: &GlobSpec) -> Result<Vec<(String, PathBuf)>> {
    let base = resolve_manifest_path(prefix_cli, &spec.path)?;
    let matcher = Glob::new(&spec.glob)
        .map_err(|e| RuckError::BadFormat(format!("bad glob '{}': {e}", spec.glob)))?
        .compile_matcher();

    let mut found = Vec::new();
    if base.is_dir() {
        for entry in WalkDir::new(&base).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let rel = path_util::relative(&base, entry.path());
            if matcher.is_match(&rel) {
                found.push((rel, entry.path().to_path_buf()));
            }
        }
    }
    found.sort_by(|a, b| a.0.cmp(&b.0));

    if found.is_empty() {
        return Err(RuckError::NoMatches { pattern: spec.glob.clone(), path: base });
    }

    Ok(found
        .into_iter()
        .map(|(rel, abs)| {
            let key = format!("{}{}", spec.prefix, rel.to_string_lossy());
            (key, abs)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bundle::Bundle;
    use image::{ImageBuffer, Rgba};
    use tempfile::tempdir;

    fn write_png(path: &Path, w: u32, h: u32) {
        let img: image::RgbaImage = ImageBuffer::from_pixel(w, h, Rgba([1, 2, 3, 255]));
        img.save(path).unwrap();
    }

    fn run_manifest(bundle: &mut Bundle, prefix: &Path, manifest: &str) -> Vec<(String, EntryCategory, &'static str)> {
        let mut events = Vec::new();
        let mut driver = ManifestDriver::new(bundle, prefix);
        {
            let mut on_status = |e: StatusEvent| {
                let (kind, key, category) = match e {
                    StatusEvent::New { key, category } => ("new", key, category),
                    StatusEvent::Updated { key, category } => ("updated", key, category),
                    StatusEvent::UpToDate { key, category } => ("uptodate", key, category),
                };
                events.push((key.to_string(), category, kind));
            };
            driver.feed(manifest.as_bytes(), &mut on_status).unwrap();
        }
        driver.finish().unwrap();
        events
    }

    #[test]
    fn files_entry_is_added_then_skipped_when_up_to_date() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"hello").unwrap();

        let mut bundle = Bundle::open(&dir.path().join("out.bundle")).unwrap();
        let manifest = r#"{"files": {"greeting": {"path": "a.txt"}}}"#;

        let events = run_manifest(&mut bundle, dir.path(), manifest);
        assert_eq!(events, vec![("greeting".to_string(), EntryCategory::File, "new")]);
        assert!(bundle.find("greeting").is_some());

        let events2 = run_manifest(&mut bundle, dir.path(), manifest);
        assert_eq!(events2, vec![("greeting".to_string(), EntryCategory::File, "uptodate")]);
    }

    #[test]
    fn glob_files_matches_are_sorted_and_prefixed() {
        let dir = tempdir().unwrap();
        let assets = dir.path().join("assets");
        std::fs::create_dir_all(&assets).unwrap();
        std::fs::write(assets.join("b.txt"), b"b").unwrap();
        std::fs::write(assets.join("a.txt"), b"a").unwrap();

        let mut bundle = Bundle::open(&dir.path().join("out.bundle")).unwrap();
        let manifest = r#"{"globFiles": [{"glob": "*.txt", "path": "assets", "prefix": "txt/"}]}"#;
        run_manifest(&mut bundle, dir.path(), manifest);

        assert!(bundle.find("txt/a.txt").is_some());
        assert!(bundle.find("txt/b.txt").is_some());
    }

    #[test]
    fn glob_files_with_no_matches_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("assets")).unwrap();

        let mut bundle = Bundle::open(&dir.path().join("out.bundle")).unwrap();
        let mut driver = ManifestDriver::new(&mut bundle, dir.path());
        let mut on_status = |_: StatusEvent| {};
        let manifest = r#"{"globFiles": [{"glob": "*.txt", "path": "assets", "prefix": ""}]}"#;
        let err = driver.feed(manifest.as_bytes(), &mut on_status).unwrap_err();
        assert!(matches!(err, RuckError::NoMatches { .. }));
    }

    #[test]
    fn texture_packs_four_images_and_round_trips_through_the_bundle() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 8, 8);
        write_png(&dir.path().join("b.png"), 16, 16);
        write_png(&dir.path().join("c.png"), 16, 16);
        write_png(&dir.path().join("d.png"), 8, 8);

        let mut bundle = Bundle::open(&dir.path().join("out.bundle")).unwrap();
        let manifest = r#"{
            "textures": {
                "atlas": {
                    "images": {
                        "a": {"path": "a.png"},
                        "b": {"path": "b.png"},
                        "c": {"path": "c.png"},
                        "d": {"path": "d.png"}
                    }
                }
            }
        }"#;
        run_manifest(&mut bundle, dir.path(), manifest);

        let entry = bundle.find("atlas").unwrap().clone();
        let tex = bundle.file_open_texture(&entry).unwrap();
        assert_eq!(tex.images.len(), 4);
    }

    #[test]
    fn explicit_anchor_x_and_y_are_kept_distinct_through_a_full_manifest() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 4, 4);

        let mut bundle = Bundle::open(&dir.path().join("out.bundle")).unwrap();
        let manifest = r#"{
            "textures": {
                "atlas": {
                    "images": {
                        "a": {"path": "a.png", "anchor": {"x": 1.5, "y": 2.5}}
                    }
                }
            }
        }"#;
        run_manifest(&mut bundle, dir.path(), manifest);

        let entry = bundle.find("atlas").unwrap().clone();
        let tex = bundle.file_open_texture(&entry).unwrap();
        match tex.images[0].anchor {
            Anchor::Explicit(x, y) => {
                assert_eq!(x, 1.5);
                assert_eq!(y, 2.5);
                assert_ne!(x, y);
            }
            other => panic!("expected an explicit anchor, got {other:?}"),
        }
    }

    #[test]
    fn unchanged_texture_manifest_is_reported_up_to_date_on_rebuild() {
        let dir = tempdir().unwrap();
        write_png(&dir.path().join("a.png"), 4, 4);

        let mut bundle = Bundle::open(&dir.path().join("out.bundle")).unwrap();
        let manifest = r#"{"textures": {"atlas": {"images": {"a": {"path": "a.png"}}}}}"#;
        let first = run_manifest(&mut bundle, dir.path(), manifest);
        assert_eq!(first, vec![("atlas".to_string(), EntryCategory::Texture, "new")]);

        let second = run_manifest(&mut bundle, dir.path(), manifest);
        assert_eq!(second, vec![("atlas".to_string(), EntryCategory::Texture, "uptodate")]);
    }
}
