//! Verification QR rendering and first-page PDF stamping.

use std::io::Write;

use common::QrPosition;
use flate2::Compression;
use flate2::write::ZlibEncoder;
use image::Luma;
use lopdf::content::{Content, Operation};
use lopdf::{Dictionary, Document, Object, ObjectId, Stream, dictionary};
use qrcode::QrCode;

use crate::error::ItemError;

/// Rendered QR module size floor, in pixels.
const QR_MIN_PIXELS: u32 = 256;

/// Guard against cyclic `/Parent` chains in malformed page trees.
const MAX_TREE_DEPTH: usize = 64;

/// US Letter, used when no `/MediaBox` can be found.
const FALLBACK_MEDIA_BOX: [f32; 4] = [0.0, 0.0, 612.0, 792.0];

/// An 8-bit grayscale raster.
#[derive(Clone, Debug)]
pub struct QrImage {
    pub width: u32,
    pub height: u32,
    pub pixels: Vec<u8>,
}

/// Footprint and default offset of the stamp, in PDF points.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StampGeometry {
    pub size: f32,
    pub margin: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub x: f32,
    pub y: f32,
    pub size: f32,
}

/// `{base}?id={cert_id}` with the id percent-encoded.
pub fn verify_url(base: &str, cert_id: &str) -> String {
    format!(
        "{}?id={}",
        base.trim_end_matches('/'),
        encode_component(cert_id)
    )
}

/// Percent-encode everything except the URI-component unreserved set.
pub(crate) fn encode_component(value: &str) -> String {
    value
        .bytes()
        .map(|b| match b {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => (b as char).to_string(),
            _ => format!("%{b:02X}"),
        })
        .collect()
}

pub fn render_qr(payload: &str) -> Result<QrImage, ItemError> {
    let code = QrCode::new(payload.as_bytes())?;
    let image = code
        .render::<Luma<u8>>()
        .min_dimensions(QR_MIN_PIXELS, QR_MIN_PIXELS)
        .build();
    Ok(QrImage {
        width: image.width(),
        height: image.height(),
        pixels: image.into_raw(),
    })
}

/// Project coordinates win per axis; otherwise bottom-right, `margin` from the edges.
pub fn placement(
    media_box: [f32; 4],
    position: Option<QrPosition>,
    geometry: StampGeometry,
) -> Placement {
    let [_, lower_y, upper_x, _] = media_box;
    let position = position.unwrap_or_default();
    Placement {
        x: position
            .x
            .unwrap_or(upper_x - geometry.size - geometry.margin),
        y: position.y.unwrap_or(lower_y + geometry.margin),
        size: geometry.size,
    }
}

/// Draw `qr` onto the first page of `source` and return the saved document.
pub fn stamp_first_page(
    source: &[u8],
    qr: &QrImage,
    position: Option<QrPosition>,
    geometry: StampGeometry,
) -> Result<Vec<u8>, ItemError> {
    let mut doc = Document::load_mem(source)?;

    let page_id = *doc
        .get_pages()
        .values()
        .next()
        .ok_or_else(|| ItemError::Pdf("document has no pages".into()))?;

    let target = placement(media_box(&doc, page_id)?, position, geometry);

    let image_id = doc.add_object(image_stream(qr)?);
    let name = format!("CertQr{}", image_id.0);
    attach_xobject(&mut doc, page_id, &name, image_id)?;
    append_draw(&mut doc, page_id, &name, target)?;

    let mut out = Vec::new();
    doc.save_to(&mut out)?;
    Ok(out)
}

fn image_stream(qr: &QrImage) -> Result<Stream, ItemError> {
    let mut encoder = ZlibEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(&qr.pixels)?;
    let data = encoder.finish()?;

    Ok(Stream::new(
        dictionary! {
            "Type" => "XObject",
            "Subtype" => "Image",
            "Width" => i64::from(qr.width),
            "Height" => i64::from(qr.height),
            "ColorSpace" => "DeviceGray",
            "BitsPerComponent" => 8i64,
            "Filter" => "FlateDecode",
        },
        data,
    ))
}

fn resolve<'a>(doc: &'a Document, object: &'a Object) -> Result<&'a Object, ItemError> {
    match object {
        Object::Reference(id) => Ok(doc.get_object(*id)?),
        other => Ok(other),
    }
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(i) => Some(*i as f32),
        Object::Real(r) => Some(*r as f32),
        _ => None,
    }
}

fn parent_of(dict: &Dictionary) -> Option<ObjectId> {
    dict.get(b"Parent").and_then(Object::as_reference).ok()
}

/// The page's `/MediaBox` as `[llx, lly, urx, ury]`, following inheritance.
fn media_box(doc: &Document, page_id: ObjectId) -> Result<[f32; 4], ItemError> {
    let mut current = Some(page_id);

    for _ in 0..MAX_TREE_DEPTH {
        let Some(id) = current else { break };
        let node = doc.get_dictionary(id)?;

        if let Ok(value) = node.get(b"MediaBox") {
            let values: Vec<f32> = resolve(doc, value)?
                .as_array()?
                .iter()
                .filter_map(|v| resolve(doc, v).ok().and_then(number))
                .collect();
            if let [x0, y0, x1, y1] = values[..] {
                return Ok([x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1)]);
            }
            return Err(ItemError::Pdf("malformed /MediaBox".into()));
        }

        current = parent_of(node);
    }

    Ok(FALLBACK_MEDIA_BOX)
}

#[derive(Clone, Copy)]
enum ResourcesAt {
    Page,
    Object(ObjectId),
}

/// Where the page's own resource dictionary lives. Inherited resources are
/// copied onto the page first so the new XObject does not leak to siblings.
fn own_resources(doc: &mut Document, page_id: ObjectId) -> Result<ResourcesAt, ItemError> {
    match doc.get_dictionary(page_id)?.get(b"Resources") {
        Ok(Object::Reference(id)) => return Ok(ResourcesAt::Object(*id)),
        Ok(Object::Dictionary(_)) => return Ok(ResourcesAt::Page),
        _ => {}
    }

    let inherited = inherited_resources(doc, page_id)?;
    doc.get_dictionary_mut(page_id)?
        .set("Resources", Object::Dictionary(inherited));
    Ok(ResourcesAt::Page)
}

fn inherited_resources(doc: &Document, page_id: ObjectId) -> Result<Dictionary, ItemError> {
    let mut current = parent_of(doc.get_dictionary(page_id)?);

    for _ in 0..MAX_TREE_DEPTH {
        let Some(id) = current else { break };
        let node = doc.get_dictionary(id)?;
        if let Ok(resources) = node.get(b"Resources") {
            return Ok(resolve(doc, resources)?.as_dict()?.clone());
        }
        current = parent_of(node);
    }

    Ok(Dictionary::new())
}

fn resources_mut(
    doc: &mut Document,
    page_id: ObjectId,
    at: ResourcesAt,
) -> Result<&mut Dictionary, ItemError> {
    match at {
        ResourcesAt::Page => Ok(doc
            .get_dictionary_mut(page_id)?
            .get_mut(b"Resources")?
            .as_dict_mut()?),
        ResourcesAt::Object(id) => Ok(doc.get_dictionary_mut(id)?),
    }
}

fn attach_xobject(
    doc: &mut Document,
    page_id: ObjectId,
    name: &str,
    image_id: ObjectId,
) -> Result<(), ItemError> {
    let at = own_resources(doc, page_id)?;
    let existing = resources_mut(doc, page_id, at)?
        .get(b"XObject")
        .ok()
        .cloned();

    match existing {
        Some(Object::Reference(id)) => {
            doc.get_dictionary_mut(id)?
                .set(name, Object::Reference(image_id));
        }
        Some(Object::Dictionary(mut xobjects)) => {
            xobjects.set(name, Object::Reference(image_id));
            resources_mut(doc, page_id, at)?.set("XObject", xobjects);
        }
        _ => {
            let mut xobjects = Dictionary::new();
            xobjects.set(name, Object::Reference(image_id));
            resources_mut(doc, page_id, at)?.set("XObject", xobjects);
        }
    }

    Ok(())
}

/// Wrap the existing content in `q ... Q` and append the image draw.
fn append_draw(
    doc: &mut Document,
    page_id: ObjectId,
    name: &str,
    at: Placement,
) -> Result<(), ItemError> {
    let mut contents = match doc.get_dictionary(page_id)?.get(b"Contents") {
        Ok(Object::Reference(id)) => match doc.get_object(*id)? {
            Object::Array(items) => items.clone(),
            _ => vec![Object::Reference(*id)],
        },
        Ok(Object::Array(items)) => items.clone(),
        _ => Vec::new(),
    };

    let save = Content {
        operations: vec![Operation::new("q", vec![])],
    };
    let draw = Content {
        operations: vec![
            Operation::new("Q", vec![]),
            Operation::new("q", vec![]),
            Operation::new(
                "cm",
                vec![
                    at.size.into(),
                    0f32.into(),
                    0f32.into(),
                    at.size.into(),
                    at.x.into(),
                    at.y.into(),
                ],
            ),
            Operation::new("Do", vec![Object::Name(name.as_bytes().to_vec())]),
            Operation::new("Q", vec![]),
        ],
    };

    let save_id = doc.add_object(Stream::new(Dictionary::new(), save.encode()?));
    let draw_id = doc.add_object(Stream::new(Dictionary::new(), draw.encode()?));

    contents.insert(0, Object::Reference(save_id));
    contents.push(Object::Reference(draw_id));
    doc.get_dictionary_mut(page_id)?
        .set("Contents", Object::Array(contents));

    Ok(())
}
