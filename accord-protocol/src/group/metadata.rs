/// Group metadata: LWW (Last-Writer-Wins) registers for name, color, image.
///
/// Each register stores the latest value, the clock of the writing event, and
/// the event id for deterministic tie-breaking.
use base64::Engine;
use thiserror::Error;

use crate::group::event::{EventId, MembershipUpdateEvent};

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetadataError {
    #[error("{0} must not be empty")]
    EmptyValue(&'static str),
}

// ---------------------------------------------------------------------------
// LWWRegister
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LWWRegister<T> {
    pub value: T,
    pub clock: u64,
    pub writer: EventId,
}

/// Write `value` into `slot` if this event supersedes the current writer.
fn lww_set<T>(slot: &mut Option<LWWRegister<T>>, value: T, clock: u64, writer: EventId) {
    let should_update = match slot {
        None => true,
        Some(reg) => clock > reg.clock || (clock == reg.clock && writer > reg.writer),
    };
    if should_update {
        *slot = Some(LWWRegister {
            value,
            clock,
            writer,
        });
    }
}

// ---------------------------------------------------------------------------
// MetadataState
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MetadataState {
    name: Option<LWWRegister<String>>,
    color: Option<LWWRegister<String>>,
    image: Option<LWWRegister<Vec<u8>>>,
}

impl MetadataState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        self.name.as_ref().map(|r| r.value.as_str()).unwrap_or("")
    }

    pub fn color(&self) -> &str {
        self.color.as_ref().map(|r| r.value.as_str()).unwrap_or("")
    }

    pub fn image(&self) -> &[u8] {
        self.image.as_ref().map(|r| r.value.as_slice()).unwrap_or(&[])
    }

    /// Image as a `data:` URI, if set.
    pub fn image_data_uri(&self) -> Option<String> {
        let image = self.image();
        if image.is_empty() {
            return None;
        }
        Some(format!(
            "data:{};base64,{}",
            sniff_image_mime(image),
            base64::engine::general_purpose::STANDARD.encode(image)
        ))
    }

    // -----------------------------------------------------------------------
    // Apply
    // -----------------------------------------------------------------------

    /// `Created` seeds name and color. Empty values are allowed here.
    pub fn apply_created(&mut self, event: &MembershipUpdateEvent, id: EventId) {
        lww_set(&mut self.name, event.name.clone(), event.clock_value, id);
        lww_set(&mut self.color, event.color.clone(), event.clock_value, id);
    }

    pub fn apply_name_changed(
        &mut self,
        event: &MembershipUpdateEvent,
        id: EventId,
    ) -> Result<(), MetadataError> {
        if event.name.is_empty() {
            return Err(MetadataError::EmptyValue("name"));
        }
        lww_set(&mut self.name, event.name.clone(), event.clock_value, id);
        Ok(())
    }

    pub fn apply_color_changed(
        &mut self,
        event: &MembershipUpdateEvent,
        id: EventId,
    ) -> Result<(), MetadataError> {
        if event.color.is_empty() {
            return Err(MetadataError::EmptyValue("color"));
        }
        lww_set(&mut self.color, event.color.clone(), event.clock_value, id);
        Ok(())
    }

    pub fn apply_image_changed(
        &mut self,
        event: &MembershipUpdateEvent,
        id: EventId,
    ) -> Result<(), MetadataError> {
        if event.image.is_empty() {
            return Err(MetadataError::EmptyValue("image"));
        }
        lww_set(&mut self.image, event.image.clone(), event.clock_value, id);
        Ok(())
    }
}

fn sniff_image_mime(bytes: &[u8]) -> &'static str {
    match bytes {
        [0x89, b'P', b'N', b'G', ..] => "image/png",
        [0xFF, 0xD8, 0xFF, ..] => "image/jpeg",
        [b'G', b'I', b'F', b'8', ..] => "image/gif",
        [b'R', b'I', b'F', b'F', _, _, _, _, b'W', b'E', b'B', b'P', ..] => "image/webp",
        _ => "application/octet-stream",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
