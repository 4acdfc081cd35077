//! Hardware device selection.

use crate::device::{DeviceDescription, DeviceType};

/// Keep only the descriptions of hardware devices, preserving order.
pub fn filter_hardware(descriptions: Vec<DeviceDescription>) -> Vec<DeviceDescription> {
    descriptions
        .into_iter()
        .filter(|d| d.device_type.is_hardware())
        .collect()
}

/// Pick the device the film merge runs on.
///
/// Returns None when `enabled` is false. An `explicit_index` inside
/// `descriptions` wins; an index out of range falls back to the automatic
/// policy: the first discrete GPU, otherwise the last integrated or virtual
/// GPU seen. Other hardware is never picked automatically.
pub fn select_device(
    descriptions: &[DeviceDescription],
    explicit_index: Option<usize>,
    enabled: bool,
) -> Option<DeviceDescription> {
    if !enabled {
        return None;
    }

    let selected = match explicit_index.and_then(|index| descriptions.get(index)) {
        Some(description) => Some(description),
        None => {
            let mut candidate = None;
            for description in descriptions {
                match description.device_type {
                    DeviceType::DiscreteGpu => {
                        candidate = Some(description);
                        break;
                    }
                    DeviceType::IntegratedGpu | DeviceType::VirtualGpu => {
                        candidate = Some(description)
                    }
                    _ => {}
                }
            }
            candidate
        }
    };

    match selected {
        Some(description) => tracing::info!(
            "Film hardware device used: {} (Type: {})",
            description.name,
            description.device_type
        ),
        None => tracing::debug!("No hardware device selected for the film merge"),
    }
    selected.cloned()
}
