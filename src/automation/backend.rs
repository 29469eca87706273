use std::str::FromStr;
use std::time::Duration;

use enigo::{Axis, Button, Coordinate, Direction, Enigo, Key, Keyboard, Mouse, Settings};
use image::RgbaImage;

use crate::automation::locate::{find_template, TemplateMatch};
use crate::errors::{DeskPilotError, DeskPilotResult};

/// Interval between intermediate points of an animated mouse movement.
const GLIDE_TICK: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn as_str(self) -> &'static str {
        match self {
            MouseButton::Left => "left",
            MouseButton::Right => "right",
            MouseButton::Middle => "middle",
        }
    }
}

impl FromStr for MouseButton {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "left" => Ok(MouseButton::Left),
            "right" => Ok(MouseButton::Right),
            "middle" => Ok(MouseButton::Middle),
            other => Err(format!(
                "invalid button '{other}' (expected 'left', 'right' or 'middle')"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirection {
    Up,
    Down,
}

impl FromStr for ScrollDirection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "up" => Ok(ScrollDirection::Up),
            "down" => Ok(ScrollDirection::Down),
            other => Err(format!("invalid direction '{other}' (expected 'up' or 'down')")),
        }
    }
}

/// Screen rectangle in pixels, top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
}

/// Synchronous desktop input and capture. Called from the blocking pool.
pub trait DesktopBackend: Send + Sync {
    fn click(&self, x: i32, y: i32, button: MouseButton, clicks: u32) -> DeskPilotResult<()>;

    fn move_to(&self, x: i32, y: i32, duration: Duration) -> DeskPilotResult<()>;

    /// Press at `from`, move to `to` over `duration`, release.
    fn drag(&self, from: (i32, i32), to: (i32, i32), duration: Duration) -> DeskPilotResult<()>;

    fn type_text(&self, text: &str) -> DeskPilotResult<()>;

    fn press_key(&self, key: Key, presses: u32) -> DeskPilotResult<()>;

    /// Hold every key in order, then release in reverse order.
    fn hotkey(&self, keys: &[Key]) -> DeskPilotResult<()>;

    fn scroll(&self, clicks: u32, direction: ScrollDirection) -> DeskPilotResult<()>;

    fn screen_size(&self) -> DeskPilotResult<(u32, u32)>;

    fn mouse_position(&self) -> DeskPilotResult<(i32, i32)>;

    /// Full capture of the primary monitor.
    fn capture(&self) -> DeskPilotResult<RgbaImage>;

    /// PNG-encoded capture, optionally cropped to `region`.
    fn screenshot_png(&self, region: Option<Region>) -> DeskPilotResult<Vec<u8>> {
        let mut img = self.capture()?;
        if let Some(r) = region {
            let (w, h) = img.dimensions();
            if r.width == 0 || r.height == 0 || r.left >= w || r.top >= h {
                return Err(DeskPilotError::Automation(format!(
                    "region {r:?} is outside the {w}x{h} screen"
                )));
            }
            let cw = r.width.min(w - r.left);
            let ch = r.height.min(h - r.top);
            img = image::imageops::crop_imm(&img, r.left, r.top, cw, ch).to_image();
        }

        let mut png_bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .map_err(|e| DeskPilotError::Automation(format!("PNG encode: {e}")))?;
        Ok(png_bytes)
    }

    /// Center of the best match of `template` on screen, in screen
    /// coordinates (captures may be in physical pixels).
    fn locate(&self, template: &RgbaImage, confidence: f64) -> DeskPilotResult<Option<(i32, i32)>> {
        let shot = self.capture()?;
        let haystack = image::imageops::grayscale(&shot);
        let needle = image::imageops::grayscale(template);
        let Some(found) = find_template(&haystack, &needle, confidence) else {
            return Ok(None);
        };
        tracing::debug!(x = found.x, y = found.y, score = found.score, "template matched");

        let (sw, sh) = self.screen_size()?;
        Ok(Some(to_screen(&found, shot.dimensions(), (sw, sh))))
    }
}

fn to_screen(found: &TemplateMatch, capture: (u32, u32), screen: (u32, u32)) -> (i32, i32) {
    let (cx, cy) = found.center();
    let sx = if capture.0 == 0 { 1.0 } else { f64::from(screen.0) / f64::from(capture.0) };
    let sy = if capture.1 == 0 { 1.0 } else { f64::from(screen.1) / f64::from(capture.1) };
    ((f64::from(cx) * sx).round() as i32, (f64::from(cy) * sy).round() as i32)
}

/// Real desktop through `enigo` (input) and `xcap` (capture). A fresh input
/// connection is opened per call.
pub struct EnigoBackend {
    pause: Duration,
}

impl EnigoBackend {
    pub fn new(pause: Duration) -> Self {
        Self { pause }
    }

    fn connect(&self) -> DeskPilotResult<Enigo> {
        Enigo::new(&Settings::default())
            .map_err(|e| DeskPilotError::Automation(format!("cannot open input connection: {e}")))
    }

    fn settle(&self) {
        if !self.pause.is_zero() {
            std::thread::sleep(self.pause);
        }
    }
}

fn input_err(e: enigo::InputError) -> DeskPilotError {
    DeskPilotError::Automation(e.to_string())
}

fn to_enigo_button(button: MouseButton) -> Button {
    match button {
        MouseButton::Left => Button::Left,
        MouseButton::Right => Button::Right,
        MouseButton::Middle => Button::Middle,
    }
}

/// Move in straight-line steps so that the whole motion takes `duration`.
fn glide(enigo: &mut Enigo, x: i32, y: i32, duration: Duration) -> DeskPilotResult<()> {
    let steps = (duration.as_millis() / GLIDE_TICK.as_millis()) as u32;
    if steps <= 1 {
        return enigo.move_mouse(x, y, Coordinate::Abs).map_err(input_err);
    }
    let (sx, sy) = enigo.location().map_err(input_err)?;
    let tick = duration / steps;
    for i in 1..=steps {
        let t = f64::from(i) / f64::from(steps);
        let px = sx + (f64::from(x - sx) * t).round() as i32;
        let py = sy + (f64::from(y - sy) * t).round() as i32;
        enigo.move_mouse(px, py, Coordinate::Abs).map_err(input_err)?;
        std::thread::sleep(tick);
    }
    Ok(())
}

impl DesktopBackend for EnigoBackend {
    fn click(&self, x: i32, y: i32, button: MouseButton, clicks: u32) -> DeskPilotResult<()> {
        let mut enigo = self.connect()?;
        enigo.move_mouse(x, y, Coordinate::Abs).map_err(input_err)?;
        for _ in 0..clicks {
            enigo
                .button(to_enigo_button(button), Direction::Click)
                .map_err(input_err)?;
        }
        self.settle();
        Ok(())
    }

    fn move_to(&self, x: i32, y: i32, duration: Duration) -> DeskPilotResult<()> {
        let mut enigo = self.connect()?;
        glide(&mut enigo, x, y, duration)?;
        self.settle();
        Ok(())
    }

    fn drag(&self, from: (i32, i32), to: (i32, i32), duration: Duration) -> DeskPilotResult<()> {
        let mut enigo = self.connect()?;
        enigo.move_mouse(from.0, from.1, Coordinate::Abs).map_err(input_err)?;
        enigo.button(Button::Left, Direction::Press).map_err(input_err)?;
        let moved = glide(&mut enigo, to.0, to.1, duration);
        // Release even when the movement failed so the button is not left held.
        let released = enigo.button(Button::Left, Direction::Release).map_err(input_err);
        moved?;
        released?;
        self.settle();
        Ok(())
    }

    fn type_text(&self, text: &str) -> DeskPilotResult<()> {
        let mut enigo = self.connect()?;
        enigo.text(text).map_err(input_err)?;
        self.settle();
        Ok(())
    }

    fn press_key(&self, key: Key, presses: u32) -> DeskPilotResult<()> {
        let mut enigo = self.connect()?;
        for _ in 0..presses {
            enigo.key(key, Direction::Click).map_err(input_err)?;
        }
        self.settle();
        Ok(())
    }

    fn hotkey(&self, keys: &[Key]) -> DeskPilotResult<()> {
        let mut enigo = self.connect()?;
        let mut held = Vec::with_capacity(keys.len());
        let mut result = Ok(());
        for &key in keys {
            if let Err(e) = enigo.key(key, Direction::Press) {
                result = Err(input_err(e));
                break;
            }
            held.push(key);
        }
        for key in held.into_iter().rev() {
            if let Err(e) = enigo.key(key, Direction::Release) {
                tracing::warn!(?key, error = %e, "failed to release key");
            }
        }
        result?;
        self.settle();
        Ok(())
    }

    fn scroll(&self, clicks: u32, direction: ScrollDirection) -> DeskPilotResult<()> {
        let mut enigo = self.connect()?;
        let clicks = i32::try_from(clicks)
            .map_err(|_| DeskPilotError::Automation(format!("too many scroll clicks: {clicks}")))?;
        // enigo scrolls down for positive lengths.
        let length = match direction {
            ScrollDirection::Down => clicks,
            ScrollDirection::Up => -clicks,
        };
        enigo.scroll(length, Axis::Vertical).map_err(input_err)?;
        self.settle();
        Ok(())
    }

    fn screen_size(&self) -> DeskPilotResult<(u32, u32)> {
        let enigo = self.connect()?;
        let (w, h) = enigo.main_display().map_err(input_err)?;
        Ok((w.max(0) as u32, h.max(0) as u32))
    }

    fn mouse_position(&self) -> DeskPilotResult<(i32, i32)> {
        let enigo = self.connect()?;
        enigo.location().map_err(input_err)
    }

    fn capture(&self) -> DeskPilotResult<RgbaImage> {
        let monitors = xcap::Monitor::all()
            .map_err(|e| DeskPilotError::Automation(format!("cannot list monitors: {e}")))?;
        let monitor = monitors
            .first()
            .ok_or_else(|| DeskPilotError::Automation("no monitor found".into()))?;
        let img = monitor
            .capture_image()
            .map_err(|e| DeskPilotError::Automation(format!("screen capture failed: {e}")))?;

        // xcap may link a different `image` release; rebuild from raw RGBA.
        let (width, height) = (img.width(), img.height());
        RgbaImage::from_raw(width, height, img.into_raw()).ok_or_else(|| {
            DeskPilotError::Automation(format!("capture buffer does not match {width}x{height}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn button_and_direction_names() {
        assert_eq!("middle".parse::<MouseButton>().unwrap(), MouseButton::Middle);
        assert!("Left".parse::<MouseButton>().unwrap_err().contains("'Left'"));
        assert_eq!("up".parse::<ScrollDirection>().unwrap(), ScrollDirection::Up);
        assert!("sideways".parse::<ScrollDirection>().is_err());
    }

    #[test]
    fn match_center_is_scaled_to_screen() {
        let found = TemplateMatch {
            x: 100,
            y: 40,
            width: 20,
            height: 10,
            score: 1.0,
        };
        // 2x physical capture of a logical screen.
        assert_eq!(to_screen(&found, (3840, 2160), (1920, 1080)), (55, 23));
        assert_eq!(to_screen(&found, (1920, 1080), (1920, 1080)), (110, 45));
    }
}
