//! Page-tree traversal for compiled artifacts.

use lopdf::{Document, Object, ObjectId};
use quaderno_api_types::PageView;
use thiserror::Error;

/// Page-tree ancestry is walked at most this deep when resolving inherited
/// attributes; real documents nest a handful of levels at most.
const PAGE_TREE_DEPTH_LIMIT: usize = 32;

#[derive(Debug, Error)]
pub enum PaginateError {
    #[error("artifact could not be read: {0}")]
    Unreadable(#[from] lopdf::Error),
    #[error("page {number} has no usable media box")]
    MediaBox { number: u32 },
}

/// Pages of the document in ascending page-number order.
pub fn page_order(document: &Document) -> Vec<(u32, ObjectId)> {
    document.get_pages().into_iter().collect()
}

/// Resolve the drawable geometry of one page.
pub fn page_view(
    document: &Document,
    number: u32,
    page_id: ObjectId,
) -> Result<PageView, PaginateError> {
    let media_box =
        find_media_box(document, page_id).ok_or(PaginateError::MediaBox { number })?;
    Ok(PageView {
        number,
        width_pts: media_box.width(),
        height_pts: media_box.height(),
    })
}

struct MediaBox {
    lower_x: f32,
    lower_y: f32,
    upper_x: f32,
    upper_y: f32,
}

impl MediaBox {
    fn width(&self) -> f32 {
        (self.upper_x - self.lower_x).abs()
    }

    fn height(&self) -> f32 {
        (self.upper_y - self.lower_y).abs()
    }
}

/// `MediaBox` is inheritable: absent on the page itself, the parent chain is
/// consulted.
fn find_media_box(document: &Document, page_id: ObjectId) -> Option<MediaBox> {
    let mut current = page_id;
    for _ in 0..PAGE_TREE_DEPTH_LIMIT {
        let dict = document.get_dictionary(current).ok()?;
        if let Ok(object) = dict.get(b"MediaBox") {
            return parse_media_box(resolve(document, object));
        }
        current = dict
            .get(b"Parent")
            .and_then(|parent| parent.as_reference())
            .ok()?;
    }
    None
}

fn resolve<'a>(document: &'a Document, object: &'a Object) -> &'a Object {
    match object {
        Object::Reference(id) => document.get_object(*id).unwrap_or(object),
        _ => object,
    }
}

fn parse_media_box(object: &Object) -> Option<MediaBox> {
    let values = object.as_array().ok()?;
    if values.len() != 4 {
        return None;
    }
    let mut corners = [0f32; 4];
    for (slot, value) in corners.iter_mut().zip(values) {
        *slot = number(value)?;
    }
    Some(MediaBox {
        lower_x: corners[0],
        lower_y: corners[1],
        upper_x: corners[2],
        upper_y: corners[3],
    })
}

fn number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(value) => Some(*value as f32),
        Object::Real(value) => Some(*value),
        _ => None,
    }
}
