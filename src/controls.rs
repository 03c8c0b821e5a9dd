//! Discovery and access of device controls.

use log::debug;
use v4l::control::Flags;

use crate::traits::{CameraError, RawControl, Result, VideoDriver};

/// First id of the user control class.
pub const USER_CLASS_BASE: u32 = 0x0098_0900;
/// One past the last predefined user control id.
pub const USER_CLASS_END: u32 = USER_CLASS_BASE + 44;

/// Control value type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlType {
    /// Signed integer in `min..=max`.
    Integer,
    /// On/off.
    Boolean,
    /// Selection among text labels.
    Menu,
    /// Action without a value.
    Button,
    /// 64-bit integer.
    Integer64,
    /// Control class marker.
    CtrlClass,
    /// String value.
    String,
    /// Bitmask value.
    Bitmask,
    /// Selection among integer values.
    IntegerMenu,
    /// Any other type code.
    Other(u32),
}

impl From<u32> for ControlType {
    fn from(code: u32) -> Self {
        match code {
            1 => Self::Integer,
            2 => Self::Boolean,
            3 => Self::Menu,
            4 => Self::Button,
            5 => Self::Integer64,
            6 => Self::CtrlClass,
            7 => Self::String,
            8 => Self::Bitmask,
            9 => Self::IntegerMenu,
            other => Self::Other(other),
        }
    }
}

impl ControlType {
    /// Whether the control carries menu entries.
    pub const fn has_menu(self) -> bool {
        matches!(self, Self::Menu | Self::IntegerMenu)
    }
}

/// Decoded control flags.
#[allow(clippy::struct_excessive_bools)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ControlFlags {
    /// Control is permanently disabled.
    pub disabled: bool,
    /// Control is temporarily owned by another application.
    pub grabbed: bool,
    /// Control cannot be written.
    pub read_only: bool,
    /// Changing the control may affect other controls.
    pub update: bool,
    /// Control is currently not applicable.
    pub inactive: bool,
    /// Control is best shown as a slider.
    pub slider: bool,
    /// Control cannot be read.
    pub write_only: bool,
    /// Control value changes without being written.
    pub volatile: bool,
}

impl From<u32> for ControlFlags {
    fn from(bits: u32) -> Self {
        let flags = Flags::from_bits_truncate(bits);
        Self {
            disabled: flags.contains(Flags::DISABLED),
            grabbed: flags.contains(Flags::GRABBED),
            read_only: flags.contains(Flags::READ_ONLY),
            update: flags.contains(Flags::UPDATE),
            inactive: flags.contains(Flags::INACTIVE),
            slider: flags.contains(Flags::SLIDER),
            write_only: flags.contains(Flags::WRITE_ONLY),
            volatile: flags.contains(Flags::VOLATILE),
        }
    }
}

/// One selectable choice of a menu control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MenuEntry {
    /// Text label of a menu control.
    Label(String),
    /// Value of an integer menu control.
    Value(i64),
}

/// A device-adjustable parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlDescriptor {
    /// Control id.
    pub id: u32,
    /// Human readable name.
    pub name: String,
    /// Value type.
    pub kind: ControlType,
    /// Minimum value.
    pub min: i32,
    /// Maximum value.
    pub max: i32,
    /// Step size.
    pub step: i32,
    /// Default value.
    pub default: i32,
    /// Decoded flags.
    pub flags: ControlFlags,
    /// Menu entries indexed `0..=max`; empty unless the type has a menu.
    pub menus: Vec<MenuEntry>,
}

/// Query every user-class control id, in ascending order.
///
/// Ids the driver rejects are skipped. For menu controls every index in
/// `0..=max` is queried, and rejected indices keep an empty placeholder so
/// entry positions match the driver's index space.
pub fn enumerate<D: VideoDriver>(driver: &mut D) -> Vec<ControlDescriptor> {
    let mut controls = Vec::new();
    for id in USER_CLASS_BASE..USER_CLASS_END {
        let Ok(raw) = driver.query_control(id) else {
            continue;
        };
        let kind = ControlType::from(raw.kind);
        let menus = if kind.has_menu() {
            query_menus(driver, &raw, kind)
        } else {
            Vec::new()
        };
        controls.push(ControlDescriptor {
            id: raw.id,
            kind,
            flags: ControlFlags::from(raw.flags),
            min: raw.minimum,
            max: raw.maximum,
            step: raw.step,
            default: raw.default_value,
            name: raw.name,
            menus,
        });
    }
    debug!("enumerated {} controls", controls.len());
    controls
}

fn query_menus<D: VideoDriver>(
    driver: &mut D,
    raw: &RawControl,
    kind: ControlType,
) -> Vec<MenuEntry> {
    let Ok(last) = u32::try_from(raw.maximum) else {
        return Vec::new();
    };
    (0..=last)
        .map(|index| {
            let item = driver.query_menu(raw.id, index).unwrap_or_default();
            match kind {
                ControlType::IntegerMenu => MenuEntry::Value(item.value),
                _ => MenuEntry::Label(item.name),
            }
        })
        .collect()
}

/// Read the current value of a control.
pub fn get<D: VideoDriver>(driver: &mut D, id: u32) -> Result<i32> {
    driver
        .get_control(id)
        .map_err(|source| CameraError::ioctl("VIDIOC_G_CTRL", source))
}

/// Write a control value.
pub fn set<D: VideoDriver>(driver: &mut D, id: u32, value: i32) -> Result<()> {
    driver
        .set_control(id, value)
        .map_err(|source| CameraError::ioctl("VIDIOC_S_CTRL", source))
}
