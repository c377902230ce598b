//! Fitting a scaled display size into what the encoder accepts.

use super::collaborators::VideoCapabilities;

/// Encoder frame size for a `source` display scaled by `factor` (0.1..=1.0).
///
/// Returns the effective factor with the chosen width and height. The result
/// is always supported by `caps` when any aligned size is; otherwise the
/// smallest size the encoder lists.
pub fn adjust_resize_factor(caps: &VideoCapabilities, source_width: u32, source_height: u32, factor: f32) -> (f32, u32, u32) {
    let (min_w, max_w) = (*caps.widths.start(), *caps.widths.end());
    let (min_h, max_h) = (*caps.heights.start(), *caps.heights.end());
    let (align_w, align_h) = (caps.width_alignment.max(1), caps.height_alignment.max(1));

    let scaled = |value: u32| (value as f64 * factor as f64).round() as u32;
    let mut width = align_to_multiple(scaled(source_width).clamp(min_w, max_w), align_w, min_w, max_w);
    let mut height = align_to_multiple(scaled(source_height).clamp(min_h, max_h), align_h, min_h, max_h);

    let aspect = source_height as f64 / source_width as f64;
    let ratio_error = |w: u32, h: u32| (h as f64 / w as f64 - aspect).abs();
    let height_for = |w: u32| {
        let raw = ((w as f64 * aspect).round() as u32).clamp(min_h, max_h);
        align_to_multiple(raw, align_h, min_h, max_h)
    };

    let ideal_height = height_for(width);
    let ideal_width = {
        let raw = ((height as f64 / aspect).round() as u32).clamp(min_w, max_w);
        align_to_multiple(raw, align_w, min_w, max_w)
    };
    match (
        caps.is_size_supported(width, ideal_height),
        caps.is_size_supported(ideal_width, height),
    ) {
        (true, true) => {
            if ratio_error(width, ideal_height) < ratio_error(ideal_width, height) {
                height = ideal_height;
            } else {
                width = ideal_width;
            }
        }
        (true, false) => height = ideal_height,
        (false, true) => width = ideal_width,
        (false, false) => {}
    }

    if !caps.is_size_supported(width, height) {
        let downward = (min_w..=width).rev().step_by(align_w as usize);
        let upward = (width..=max_w).step_by(align_w as usize);
        let best = downward
            .chain(upward)
            .map(|w| (w, height_for(w)))
            .filter(|&(w, h)| caps.is_size_supported(w, h))
            .fold(None, |best: Option<(u32, u32, f64)>, (w, h)| {
                let error = ratio_error(w, h);
                match best {
                    Some((_, _, best_error)) if best_error <= error => best,
                    _ => Some((w, h, error)),
                }
            });
        (width, height) = match best {
            Some((w, h, _)) => (w, h),
            None => (min_w, min_h),
        };
    }

    let factor = (width as f32 / source_width as f32 + height as f32 / source_height as f32) / 2.0;
    (factor, width, height)
}

/// Nearest multiple of `alignment` within `min..=max`, preferring the lower one on ties.
fn align_to_multiple(value: u32, alignment: u32, min: u32, max: u32) -> u32 {
    let remainder = value % alignment.max(1);
    if alignment <= 1 || remainder == 0 {
        return value.clamp(min, max);
    }
    let down = (value - remainder).max(min);
    let up = (down + alignment).min(max);
    if value.abs_diff(up) < value.abs_diff(down) {
        up
    } else {
        down
    }
}
