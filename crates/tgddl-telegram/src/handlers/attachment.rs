use teloxide::types::{Message, PhotoSize};

use tgddl_core::ingest::Attachment;

/// Extract the file-bearing attachment of a message, if any.
///
/// Documents win over photos, photos over videos, videos over audio. For
/// photos only the largest resolution variant is kept.
pub fn from_message(msg: &Message) -> Option<Attachment> {
    if let Some(doc) = msg.document() {
        return Some(Attachment::Document {
            file_ref: doc.file.id.clone(),
            file_name: doc.file_name.clone(),
            mime_type: doc.mime_type.as_ref().map(|m| m.essence_str().to_string()),
            size: known_size(doc.file.size as u64),
        });
    }

    if let Some(photo) = msg.photo().and_then(largest_photo) {
        return Some(Attachment::Photo {
            file_ref: photo.file.id.clone(),
            width: photo.width,
            height: photo.height,
            size: known_size(photo.file.size as u64),
        });
    }

    if let Some(video) = msg.video() {
        return Some(Attachment::Video {
            file_ref: video.file.id.clone(),
            file_name: video.file_name.clone(),
            mime_type: video.mime_type.as_ref().map(|m| m.essence_str().to_string()),
            size: known_size(video.file.size as u64),
            width: video.width,
            height: video.height,
        });
    }

    if let Some(audio) = msg.audio() {
        return Some(Attachment::Audio {
            file_ref: audio.file.id.clone(),
            file_name: audio.file_name.clone(),
            mime_type: audio.mime_type.as_ref().map(|m| m.essence_str().to_string()),
            size: known_size(audio.file.size as u64),
            performer: audio.performer.clone(),
            title: audio.title.clone(),
        });
    }

    None
}

fn largest_photo(sizes: &[PhotoSize]) -> Option<&PhotoSize> {
    largest_by_area(sizes, |p| (p.width, p.height))
}

/// Pick the item with the largest `width * height`; later items win ties
/// (Telegram lists photo sizes smallest first).
fn largest_by_area<T>(items: &[T], dims: impl Fn(&T) -> (u32, u32)) -> Option<&T> {
    items.iter().max_by_key(|item| {
        let (w, h) = dims(item);
        u64::from(w) * u64::from(h)
    })
}

/// Telegram reports 0 when it does not know the size.
fn known_size(size: u64) -> Option<u64> {
    (size > 0).then_some(size)
}
