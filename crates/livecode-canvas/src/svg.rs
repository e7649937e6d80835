//! SVG export of a recorded canvas.

use std::fmt::Write;

use crate::recording::{RecordingSurface, Shape};
use crate::surface::DrawSurface;

/// Render the visible shapes of `surface` as a standalone SVG document.
///
/// Partial clears are painted with the white background colour.
pub fn to_svg(surface: &RecordingSurface) -> String {
    let (width, height) = surface.pixel_size();
    let mut out = String::new();

    // Writing into a String never fails.
    let _ = writeln!(
        out,
        r#"<svg xmlns="http://www.w3.org/2000/svg" width="{width}" height="{height}" viewBox="0 0 {width} {height}">"#
    );
    let _ = writeln!(
        out,
        r#"  <rect x="0" y="0" width="{width}" height="{height}" fill="white"/>"#
    );
    let _ = writeln!(out, r#"  <g fill="none" stroke="black" stroke-width="1">"#);

    for shape in surface.visible() {
        let _ = writeln!(out, "    {}", element(shape));
    }

    out.push_str("  </g>\n</svg>\n");
    out
}

fn element(shape: &Shape) -> String {
    match shape {
        Shape::Line { x1, y1, x2, y2 } => {
            format!(r#"<line x1="{x1}" y1="{y1}" x2="{x2}" y2="{y2}"/>"#)
        }
        Shape::Arc { cx, cy, rx, ry, .. } if shape.is_full_circle() => {
            format!(r#"<ellipse cx="{cx}" cy="{cy}" rx="{rx}" ry="{ry}"/>"#)
        }
        Shape::Arc {
            cx,
            cy,
            rx,
            ry,
            start,
            end,
        } => {
            let (x0, y0) = (cx + rx * start.cos(), cy + ry * start.sin());
            let (x1, y1) = (cx + rx * end.cos(), cy + ry * end.sin());
            let large = i32::from((end - start).abs() > std::f64::consts::PI);
            let sweep = i32::from(end > start);
            format!(r#"<path d="M {x0} {y0} A {rx} {ry} 0 {large} {sweep} {x1} {y1}"/>"#)
        }
        Shape::Rect { x, y, w, h } => {
            format!(r#"<rect x="{x}" y="{y}" width="{w}" height="{h}"/>"#)
        }
        Shape::Clear { x, y, w, h } => {
            format!(r#"<rect x="{x}" y="{y}" width="{w}" height="{h}" fill="white" stroke="none"/>"#)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    #[test]
    fn test_svg_contains_shapes() {
        let mut surface = RecordingSurface::new(600.0, 600.0);
        surface.begin_path();
        surface.arc(300.0, 300.0, 60.0, 0.0, TAU);
        surface.stroke();
        surface.begin_path();
        surface.move_to(0.0, 0.0);
        surface.line_to(600.0, 600.0);
        surface.stroke();

        let svg = to_svg(&surface);
        assert!(svg.starts_with("<svg"));
        assert!(svg.contains(r#"width="600""#));
        assert!(svg.contains(r#"<ellipse cx="300" cy="300" rx="60" ry="60"/>"#));
        assert!(svg.contains(r#"<line x1="0" y1="0" x2="600" y2="600"/>"#));
        assert!(svg.trim_end().ends_with("</svg>"));
    }

    #[test]
    fn test_svg_drops_shapes_before_full_clear() {
        let mut surface = RecordingSurface::new(100.0, 100.0);
        surface.begin_path();
        surface.rect(1.0, 2.0, 3.0, 4.0);
        surface.stroke();
        surface.clear_rect(0.0, 0.0, 100.0, 100.0);

        let svg = to_svg(&surface);
        assert!(!svg.contains(r#"<rect x="1""#));
    }
}
