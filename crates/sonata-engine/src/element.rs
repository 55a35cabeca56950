use crate::storage::{ElementKind, Layout};

/// A Rust type that one dataset row decodes into.
pub trait Element: Sized {
    /// Short description used in type-mismatch errors.
    const DESCRIPTION: &'static str;

    fn accepts(layout: &Layout) -> bool;

    /// Decodes one row; `row` is exactly `layout.row_bytes()` long.
    fn decode(row: &[u8], layout: &Layout) -> Result<Self, String>;
}

fn le_i32(b: &[u8]) -> i32 {
    i32::from_le_bytes([b[0], b[1], b[2], b[3]])
}

fn le_f64(b: &[u8]) -> f64 {
    let mut a = [0u8; 8];
    a.copy_from_slice(&b[..8]);
    f64::from_le_bytes(a)
}

fn is_vector(layout: &Layout) -> bool {
    layout.shape.len() <= 1
}

impl Element for i32 {
    const DESCRIPTION: &'static str = "int32";

    fn accepts(layout: &Layout) -> bool {
        layout.kind == ElementKind::Int32 && is_vector(layout)
    }

    fn decode(row: &[u8], _: &Layout) -> Result<Self, String> {
        Ok(le_i32(row))
    }
}

impl Element for f64 {
    const DESCRIPTION: &'static str = "float64";

    fn accepts(layout: &Layout) -> bool {
        layout.kind == ElementKind::Float64 && is_vector(layout)
    }

    fn decode(row: &[u8], _: &Layout) -> Result<Self, String> {
        Ok(le_f64(row))
    }
}

impl Element for String {
    const DESCRIPTION: &'static str = "fixed-width string";

    fn accepts(layout: &Layout) -> bool {
        matches!(layout.kind, ElementKind::FixedString { .. }) && is_vector(layout)
    }

    fn decode(row: &[u8], layout: &Layout) -> Result<Self, String> {
        // stored width plus room for the terminator
        let mut buf = vec![0u8; layout.kind.width() + 1];
        buf[..row.len()].copy_from_slice(row);
        let end = buf.iter().position(|&b| b == 0).unwrap_or(row.len());
        buf.truncate(end);
        String::from_utf8(buf).map_err(|e| format!("invalid utf-8: {}", e))
    }
}

/// Pairs come from two-column integer datasets, e.g. the `[start, end)`
/// tables of a range index.
impl Element for (i32, i32) {
    const DESCRIPTION: &'static str = "int32 pair";

    fn accepts(layout: &Layout) -> bool {
        layout.kind == ElementKind::Int32 && layout.shape.len() == 2 && layout.shape[1] == 2
    }

    fn decode(row: &[u8], _: &Layout) -> Result<Self, String> {
        Ok((le_i32(&row[..4]), le_i32(&row[4..8])))
    }
}

/// Scalar types that 2-D datasets can be read into as a matrix.
pub trait Scalar: Copy + Default {
    const KIND: ElementKind;

    fn from_le(b: &[u8]) -> Self;
}

impl Scalar for i32 {
    const KIND: ElementKind = ElementKind::Int32;

    fn from_le(b: &[u8]) -> Self {
        le_i32(b)
    }
}

impl Scalar for f64 {
    const KIND: ElementKind = ElementKind::Float64;

    fn from_le(b: &[u8]) -> Self {
        le_f64(b)
    }
}
