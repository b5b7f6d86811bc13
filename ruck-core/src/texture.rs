use crate::error::{Result, RuckError};
use std::io::{Read, Write};

pub const TEXTURE_MAGIC: u32 = 0x58545352; // 'RSTX' little-endian on disk
pub const TEXTURE_VERSION: u32 = 1;

/// Where a sprite is anchored by downstream renderers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Anchor {
    Center,
    Top,
    Right,
    Bottom,
    Left,
    TopLeft,
    TopRight,
    BottomLeft,
    BottomRight,
    /// Explicit point; only `Explicit` carries meaningful `anchor_x`/`anchor_y`.
    Explicit(f32, f32),
}

impl Anchor {
    fn kind_byte(self) -> u8 {
        match self {
            Anchor::Center => 0,
            Anchor::Top => 1,
            Anchor::Right => 2,
            Anchor::Bottom => 3,
            Anchor::Left => 4,
            Anchor::TopLeft => 5,
            Anchor::TopRight => 6,
            Anchor::BottomLeft => 7,
            Anchor::BottomRight => 8,
            Anchor::Explicit(..) => 9,
        }
    }

    fn from_parts(kind: u8, x: f32, y: f32) -> Result<Anchor> {
        Ok(match kind {
            0 => Anchor::Center,
            1 => Anchor::Top,
            2 => Anchor::Right,
            3 => Anchor::Bottom,
            4 => Anchor::Left,
            5 => Anchor::TopLeft,
            6 => Anchor::TopRight,
            7 => Anchor::BottomLeft,
            8 => Anchor::BottomRight,
            9 => Anchor::Explicit(x, y),
            other => return Err(RuckError::BadFormat(format!("unknown anchor kind {other}"))),
        })
    }

    pub fn xy(self) -> (f32, f32) {
        match self {
            Anchor::Explicit(x, y) => (x, y),
            _ => (0.0, 0.0),
        }
    }
}

/// One sprite contributing to a texture.
#[derive(Debug, Clone)]
pub struct Image {
    pub key: String,
    pub path: std::path::PathBuf,
    pub width: u32,
    pub height: u32,
    pub anchor: Anchor,
    /// Filled in once the packer has placed the image.
    pub placement: Option<Placement>,
}

#[derive(Debug, Clone, Copy)]
pub struct Placement {
    pub page_index: u32,
    pub x: u32,
    pub y: u32,
    pub rotated: bool,
}

impl Image {
    pub fn new(key: impl Into<String>, path: impl Into<std::path::PathBuf>, anchor: Anchor) -> Self {
        Image { key: key.into(), path: path.into(), width: 0, height: 0, anchor, placement: None }
    }
}

/// One composite image produced by the packer, plus its encoded bytes.
#[derive(Debug, Clone)]
pub struct Page {
    pub width: u32,
    pub height: u32,
    pub encoded: Vec<u8>,
}

/// A packed-sprite artifact: constraints, placed images, and pages.
#[derive(Debug, Clone)]
pub struct Texture {
    pub max_width: u32,
    pub max_height: u32,
    pub pow2: bool,
    pub allow_r90: bool,
    pub images: Vec<Image>,
    pub pages: Vec<Page>,
}

impl Default for Texture {
    fn default() -> Self {
        Texture {
            max_width: 1024,
            max_height: 1024,
            pow2: true,
            allow_r90: true,
            images: Vec::new(),
            pages: Vec::new(),
        }
    }
}

impl Texture {
    /// Byte size of the serialized form, without allocating it.
    pub fn size(&self) -> usize {
        self.encode().len()
    }

    /// Serialize per the on-disk texture-entry layout (all little-endian).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&TEXTURE_MAGIC.to_le_bytes());
        out.extend_from_slice(&TEXTURE_VERSION.to_le_bytes());
        out.extend_from_slice(&self.max_width.to_le_bytes());
        out.extend_from_slice(&self.max_height.to_le_bytes());
        out.push(self.pow2 as u8);
        out.push(self.allow_r90 as u8);

        out.extend_from_slice(&(self.pages.len() as u32).to_le_bytes());
        for page in &self.pages {
            out.extend_from_slice(&page.width.to_le_bytes());
            out.extend_from_slice(&page.height.to_le_bytes());
            out.extend_from_slice(&(page.encoded.len() as u32).to_le_bytes());
        }

        // Writers must emit image records sorted by key for determinism.
        let mut ordered: Vec<&Image> = self.images.iter().collect();
        ordered.sort_by(|a, b| a.key.cmp(&b.key));

        out.extend_from_slice(&(ordered.len() as u32).to_le_bytes());
        for img in ordered {
            let p = img.placement.unwrap_or(Placement { page_index: 0, x: 0, y: 0, rotated: false });
            out.extend_from_slice(&p.page_index.to_le_bytes());
            out.extend_from_slice(&p.x.to_le_bytes());
            out.extend_from_slice(&p.y.to_le_bytes());
            out.extend_from_slice(&img.width.to_le_bytes());
            out.extend_from_slice(&img.height.to_le_bytes());
            out.push(p.rotated as u8);
            out.push(img.anchor.kind_byte());
            let (ax, ay) = img.anchor.xy();
            out.extend_from_slice(&ax.to_le_bytes());
            out.extend_from_slice(&ay.to_le_bytes());
            let key_bytes = img.key.as_bytes();
            out.extend_from_slice(&(key_bytes.len() as u32).to_le_bytes());
            out.extend_from_slice(key_bytes);
        }

        for page in &self.pages {
            out.extend_from_slice(&page.encoded);
        }

        out
    }

    pub fn write_to(&self, mut w: impl Write) -> Result<()> {
        w.write_all(&self.encode()).map_err(|source| RuckError::Io { path: "<texture>".into(), source })
    }

    /// Deserialize a texture entry previously produced by [`Texture::encode`].
    pub fn decode(bytes: &[u8]) -> Result<Texture> {
        let mut r = bytes;
        let magic = read_u32(&mut r)?;
        if magic != TEXTURE_MAGIC {
            return Err(RuckError::BadFormat(format!("bad texture magic: {magic:#x}")));
        }
        let version = read_u32(&mut r)?;
        if version != TEXTURE_VERSION {
            return Err(RuckError::BadFormat(format!("unsupported texture version: {version}")));
        }
        let max_width = read_u32(&mut r)?;
        let max_height = read_u32(&mut r)?;
        let pow2 = read_u8(&mut r)? != 0;
        let allow_r90 = read_u8(&mut r)? != 0;

        let page_count = read_u32(&mut r)? as usize;
        let mut page_dims = Vec::with_capacity(page_count);
        for _ in 0..page_count {
            let width = read_u32(&mut r)?;
            let height = read_u32(&mut r)?;
            let encoded_len = read_u32(&mut r)? as usize;
            page_dims.push((width, height, encoded_len));
        }

        let image_count = read_u32(&mut r)? as usize;
        let mut images = Vec::with_capacity(image_count);
        for _ in 0..image_count {
            let page_index = read_u32(&mut r)?;
            let x = read_u32(&mut r)?;
            let y = read_u32(&mut r)?;
            let w = read_u32(&mut r)?;
            let h = read_u32(&mut r)?;
            let rotated = read_u8(&mut r)? != 0;
            let anchor_kind = read_u8(&mut r)?;
            let anchor_x = read_f32(&mut r)?;
            let anchor_y = read_f32(&mut r)?;
            let key_len = read_u32(&mut r)? as usize;
            let key = read_bytes(&mut r, key_len)?;
            let key = String::from_utf8(key)
                .map_err(|_| RuckError::BadFormat("non-utf8 image key".into()))?;
            let anchor = Anchor::from_parts(anchor_kind, anchor_x, anchor_y)?;
            images.push(Image {
                key,
                path: std::path::PathBuf::new(),
                width: w,
                height: h,
                anchor,
                placement: Some(Placement { page_index, x, y, rotated }),
            });
        }

        let mut pages = Vec::with_capacity(page_count);
        for (width, height, encoded_len) in page_dims {
            let encoded = read_bytes(&mut r, encoded_len)?;
            pages.push(Page { width, height, encoded });
        }

        Ok(Texture { max_width, max_height, pow2, allow_r90, images, pages })
    }
}

fn read_u32(r: &mut &[u8]) -> Result<u32> {
    let bytes = read_bytes(r, 4)?;
    Ok(u32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_f32(r: &mut &[u8]) -> Result<f32> {
    let bytes = read_bytes(r, 4)?;
    Ok(f32::from_le_bytes(bytes.try_into().unwrap()))
}

fn read_u8(r: &mut &[u8]) -> Result<u8> {
    let bytes = read_bytes(r, 1)?;
    Ok(bytes[0])
}

fn read_bytes(r: &mut &[u8], n: usize) -> Result<Vec<u8>> {
    if r.len() < n {
        return Err(RuckError::BadFormat("truncated texture entry".into()));
    }
    let (head, tail) = r.split_at(n);
    *r = tail;
    Ok(head.to_vec())
}

/// Read the whole of `r` and decode it as a texture entry.
pub fn read_texture(mut r: impl Read) -> Result<Texture> {
    let mut buf = Vec::new();
    r.read_to_end(&mut buf).map_err(|source| RuckError::Io { path: "<texture>".into(), source })?;
    Texture::decode(&buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_image(key: &str, w: u32, h: u32, anchor: Anchor, placement: Placement) -> Image {
        Image { key: key.to_string(), path: std::path::PathBuf::new(), width: w, height: h, anchor, placement: Some(placement) }
    }

    #[test]
    fn encode_decode_round_trip_preserves_fields() {
        let tex = Texture {
            max_width: 256,
            max_height: 128,
            pow2: false,
            allow_r90: false,
            images: vec![
                sample_image("b", 8, 8, Anchor::Center, Placement { page_index: 0, x: 0, y: 0, rotated: false }),
                sample_image("a", 16, 8, Anchor::Explicit(1.5, 2.5), Placement { page_index: 0, x: 8, y: 0, rotated: true }),
            ],
            pages: vec![Page { width: 256, height: 128, encoded: vec![1, 2, 3, 4] }],
        };

        let bytes = tex.encode();
        let decoded = Texture::decode(&bytes).unwrap();

        assert_eq!(decoded.max_width, 256);
        assert_eq!(decoded.max_height, 128);
        assert!(!decoded.pow2);
        assert!(!decoded.allow_r90);
        assert_eq!(decoded.pages.len(), 1);
        assert_eq!(decoded.pages[0].encoded, vec![1, 2, 3, 4]);
        assert_eq!(decoded.images.len(), 2);

        let a = decoded.images.iter().find(|i| i.key == "a").unwrap();
        assert_eq!(a.width, 16);
        assert_eq!(a.height, 8);
        assert!(a.placement.unwrap().rotated);
        match a.anchor {
            Anchor::Explicit(x, y) => {
                assert_eq!(x, 1.5);
                // Regression guard: the redesign must not carry over the
                // source's bug where anchor.y was stored into anchor_x.
                assert_eq!(y, 2.5);
                assert_ne!(x, y);
            }
            other => panic!("expected Explicit anchor, got {other:?}"),
        }
    }

    #[test]
    fn writers_emit_image_records_sorted_by_key() {
        let tex = Texture {
            images: vec![
                sample_image("zebra", 4, 4, Anchor::Center, Placement { page_index: 0, x: 0, y: 0, rotated: false }),
                sample_image("apple", 4, 4, Anchor::Center, Placement { page_index: 0, x: 4, y: 0, rotated: false }),
            ],
            pages: vec![Page { width: 8, height: 4, encoded: vec![] }],
            ..Texture::default()
        };
        let bytes = tex.encode();
        let decoded = Texture::decode(&bytes).unwrap();
        let keys: Vec<&str> = decoded.images.iter().map(|i| i.key.as_str()).collect();
        assert_eq!(keys, vec!["apple", "zebra"]);
    }

    #[test]
    fn decode_rejects_bad_magic() {
        let bytes = vec![0u8; 32];
        let err = Texture::decode(&bytes).unwrap_err();
        assert!(matches!(err, RuckError::BadFormat(_)));
    }

    #[test]
    fn anchor_kind_round_trips_for_every_named_anchor() {
        let anchors = [
            Anchor::Center,
            Anchor::Top,
            Anchor::Right,
            Anchor::Bottom,
            Anchor::Left,
            Anchor::TopLeft,
            Anchor::TopRight,
            Anchor::BottomLeft,
            Anchor::BottomRight,
        ];
        for anchor in anchors {
            let tex = Texture {
                images: vec![sample_image("k", 1, 1, anchor, Placement { page_index: 0, x: 0, y: 0, rotated: false })],
                pages: vec![Page { width: 4, height: 4, encoded: vec![] }],
                ..Texture::default()
            };
            let decoded = Texture::decode(&tex.encode()).unwrap();
            assert_eq!(decoded.images[0].anchor, anchor);
        }
    }
}
