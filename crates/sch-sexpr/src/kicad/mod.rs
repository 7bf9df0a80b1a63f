//! KiCad-specific S-expression helpers.
//!
//! - [`props`] - common "property-like" query helpers
//! - [`schematic`] - KiCad schematic (`.kicad_sch`) helpers that keep spans

pub mod props;
pub mod schematic;

pub use props::{
    child_list, int_prop, string_prop, string_prop_node, sym_prop, uuid_prop,
};
pub use schematic::{
    InstanceRef, SchProperty, SheetPinNode, schematic_at, schematic_instance_refs,
    schematic_mirror, schematic_pins, schematic_properties, sheet_pins, sheet_size,
};
