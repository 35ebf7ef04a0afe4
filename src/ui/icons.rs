//! Tray icon bitmaps.
//!
//! Icons are drawn at runtime as RGBA: a status dot (green when every
//! service is fine, red when any reports an error) with a microphone glyph,
//! struck through while the mic is muted.

/// Icon size in pixels.
pub const ICON_SIZE: u32 = 32;

const HEALTHY: (u8, u8, u8) = (60, 180, 60);
const FAULTED: (u8, u8, u8) = (220, 60, 60);

/// What the icon shows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IconState {
    pub has_error: bool,
    pub muted: bool,
}

/// Render the icon for `state` as RGBA, `ICON_SIZE` square.
pub fn render(state: IconState) -> Vec<u8> {
    let size = ICON_SIZE as usize;
    let mut rgba = vec![0u8; size * size * 4];

    let center = size as f32 / 2.0;
    let radius = size as f32 / 2.0 - 3.0;
    let (r, g, b) = if state.has_error { FAULTED } else { HEALTHY };

    for y in 0..size {
        for x in 0..size {
            let idx = (y * size + x) * 4;
            let dx = x as f32 + 0.5 - center;
            let dy = y as f32 + 0.5 - center;
            let dist = (dx * dx + dy * dy).sqrt();

            let alpha = if dist < radius {
                255
            } else if dist < radius + 1.0 {
                // Anti-aliased edge
                ((radius + 1.0 - dist) * 255.0) as u8
            } else {
                continue;
            };
            rgba[idx..idx + 4].copy_from_slice(&[r, g, b, alpha]);
        }
    }

    draw_microphone(&mut rgba, size);
    if state.muted {
        draw_strike_through(&mut rgba, size);
    }

    rgba
}

fn paint(rgba: &mut [u8], size: usize, x: usize, y: usize, value: u8) {
    if x >= size || y >= size {
        return;
    }
    let idx = (y * size + x) * 4;
    // Stay inside the dot.
    if rgba[idx + 3] > 0 {
        rgba[idx..idx + 3].copy_from_slice(&[value, value, value]);
    }
}

fn draw_microphone(rgba: &mut [u8], size: usize) {
    let center_x = size / 2;
    let body_width = size / 4;
    let body_top = size / 4;
    let body_height = size / 2 - 2;

    for y in body_top..body_top + body_height {
        for x in center_x - body_width / 2..center_x + body_width / 2 {
            paint(rgba, size, x, y, 255);
        }
    }

    // Stand
    let stand_top = body_top + body_height;
    for y in stand_top..stand_top + 4 {
        paint(rgba, size, center_x, y, 255);
        paint(rgba, size, center_x - 1, y, 255);
    }
}

fn draw_strike_through(rgba: &mut [u8], size: usize) {
    for i in 5..size - 5 {
        for thickness in 0..2 {
            paint(rgba, size, i, i + thickness, 30);
        }
    }
}
