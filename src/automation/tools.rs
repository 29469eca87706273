use std::sync::Arc;
use std::time::Duration;

use base64::Engine;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};

use crate::automation::backend::{DesktopBackend, MouseButton, Region, ScrollDirection};
use crate::automation::keys::{parse_combination, parse_key};
use crate::errors::DeskPilotError;
use crate::mcp::protocol::McpTool;

/// Result of a tool that ran. Both variants reach the caller as plain text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolOutcome {
    Success(String),
    Failure(String),
}

impl ToolOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ToolOutcome::Success(_))
    }

    pub fn text(&self) -> &str {
        match self {
            ToolOutcome::Success(t) | ToolOutcome::Failure(t) => t,
        }
    }

    pub fn into_text(self) -> String {
        match self {
            ToolOutcome::Success(t) | ToolOutcome::Failure(t) => t,
        }
    }
}

/// The call never reached a tool.
#[derive(Debug, thiserror::Error)]
pub enum ToolCallError {
    #[error("unknown tool '{0}'")]
    UnknownTool(String),
}

/// The fixed desktop tool catalog on top of a [`DesktopBackend`].
pub struct ToolSet {
    backend: Arc<dyn DesktopBackend>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScreenshotArgs {
    #[serde(default)]
    region: Option<[i64; 4]>,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ClickArgs {
    #[serde(deserialize_with = "lax_int")]
    x: i32,
    #[serde(deserialize_with = "lax_int")]
    y: i32,
    #[serde(default = "default_button")]
    button: String,
    #[serde(default = "one", deserialize_with = "lax_int")]
    clicks: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct MoveArgs {
    #[serde(deserialize_with = "lax_int")]
    x: i32,
    #[serde(deserialize_with = "lax_int")]
    y: i32,
    #[serde(default = "default_duration", deserialize_with = "lax_float")]
    duration: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct DragArgs {
    #[serde(deserialize_with = "lax_int")]
    start_x: i32,
    #[serde(deserialize_with = "lax_int")]
    start_y: i32,
    #[serde(deserialize_with = "lax_int")]
    end_x: i32,
    #[serde(deserialize_with = "lax_int")]
    end_y: i32,
    #[serde(default = "default_duration", deserialize_with = "lax_float")]
    duration: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct TypeArgs {
    text: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct KeyArgs {
    key: String,
    #[serde(default = "one", deserialize_with = "lax_int")]
    presses: i64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScrollArgs {
    #[serde(deserialize_with = "lax_int")]
    clicks: i64,
    #[serde(default = "default_direction")]
    direction: String,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct FindArgs {
    image_path: String,
    #[serde(default = "default_confidence", deserialize_with = "lax_float")]
    confidence: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct WaitArgs {
    #[serde(deserialize_with = "lax_float")]
    seconds: f64,
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct NoArgs {}

fn default_button() -> String {
    "left".into()
}
fn default_direction() -> String {
    "down".into()
}
fn one() -> i64 {
    1
}
fn default_duration() -> f64 {
    0.25
}
fn default_confidence() -> f64 {
    0.8
}

/// Integers as models tend to send them: `100`, `100.0` or `"100"`.
fn lax_int<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: TryFrom<i64>,
{
    let value = Value::deserialize(deserializer)?;
    let n = match &value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().and_then(integral)),
        Value::String(s) => {
            let s = s.trim();
            s.parse::<i64>()
                .ok()
                .or_else(|| s.parse::<f64>().ok().and_then(integral))
        }
        _ => None,
    };
    let n = n.ok_or_else(|| D::Error::custom(format!("expected an integer, got {value}")))?;
    T::try_from(n).map_err(|_| D::Error::custom(format!("integer out of range: {n}")))
}

fn integral(f: f64) -> Option<i64> {
    (f.is_finite() && f.fract() == 0.0 && f.abs() < (1u64 << 53) as f64).then_some(f as i64)
}

fn lax_float<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let n = match &value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    n.ok_or_else(|| D::Error::custom(format!("expected a number, got {value}")))
}

/// Seconds as a duration; rejects negative and non-finite values.
fn seconds(value: f64, what: &str) -> Result<Duration, String> {
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{what} must be a non-negative number of seconds, got {value}"));
    }
    Duration::try_from_secs_f64(value).map_err(|e| format!("{what}: {e}"))
}

fn at_least_one(value: i64, what: &str) -> Result<u32, String> {
    if value < 1 {
        return Err(format!("{what} must be at least 1, got {value}"));
    }
    u32::try_from(value).map_err(|_| format!("{what} is too large: {value}"))
}

fn backend_err(e: DeskPilotError) -> String {
    match e {
        DeskPilotError::Automation(message) => message,
        other => other.to_string(),
    }
}

fn outcome(result: Result<String, String>, failure_prefix: &str) -> ToolOutcome {
    match result {
        Ok(text) => ToolOutcome::Success(text),
        Err(e) => ToolOutcome::Failure(format!("{failure_prefix}: {e}")),
    }
}

impl ToolSet {
    pub fn new(backend: Arc<dyn DesktopBackend>) -> Self {
        Self { backend }
    }

    /// Tool descriptors as advertised by `tools/list`.
    pub fn catalog() -> Vec<McpTool> {
        fn tool(name: &str, description: &str, properties: Value, required: &[&str]) -> McpTool {
            McpTool {
                name: name.to_string(),
                description: description.to_string(),
                input_schema: json!({
                    "type": "object",
                    "properties": properties,
                    "required": required,
                }),
            }
        }

        vec![
            tool(
                "take_screenshot",
                "Take a screenshot of the desktop or a specific region. Returns a truncated base64 PNG preview.",
                json!({
                    "region": {
                        "type": "array",
                        "items": {"type": "integer"},
                        "minItems": 4,
                        "maxItems": 4,
                        "description": "Optional [left, top, width, height] for a partial screenshot"
                    }
                }),
                &[],
            ),
            tool(
                "click_at",
                "Click at specific coordinates on the screen.",
                json!({
                    "x": {"type": "integer", "description": "X coordinate"},
                    "y": {"type": "integer", "description": "Y coordinate"},
                    "button": {"type": "string", "enum": ["left", "right", "middle"], "default": "left"},
                    "clicks": {"type": "integer", "minimum": 1, "default": 1, "description": "1 for single, 2 for double click"}
                }),
                &["x", "y"],
            ),
            tool(
                "move_mouse",
                "Move the mouse to specific coordinates.",
                json!({
                    "x": {"type": "integer"},
                    "y": {"type": "integer"},
                    "duration": {"type": "number", "minimum": 0, "default": 0.25, "description": "Seconds to complete the movement"}
                }),
                &["x", "y"],
            ),
            tool(
                "drag_mouse",
                "Drag the mouse from start coordinates to end coordinates with the left button held.",
                json!({
                    "start_x": {"type": "integer"},
                    "start_y": {"type": "integer"},
                    "end_x": {"type": "integer"},
                    "end_y": {"type": "integer"},
                    "duration": {"type": "number", "minimum": 0, "default": 0.25}
                }),
                &["start_x", "start_y", "end_x", "end_y"],
            ),
            tool(
                "type_text",
                "Type text at the current cursor position.",
                json!({"text": {"type": "string"}}),
                &["text"],
            ),
            tool(
                "press_key",
                "Press a key or a key combination such as 'enter', 'ctrl+c' or 'alt+tab'.",
                json!({
                    "key": {"type": "string"},
                    "presses": {"type": "integer", "minimum": 1, "default": 1, "description": "Ignored for combinations"}
                }),
                &["key"],
            ),
            tool(
                "scroll",
                "Scroll the mouse wheel.",
                json!({
                    "clicks": {"type": "integer", "minimum": 1},
                    "direction": {"type": "string", "enum": ["up", "down"], "default": "down"}
                }),
                &["clicks"],
            ),
            tool("get_screen_size", "Get the current screen resolution.", json!({}), &[]),
            tool(
                "find_on_screen",
                "Find an image file on the screen and return the center of its location.",
                json!({
                    "image_path": {"type": "string", "description": "Path to the image to search for"},
                    "confidence": {"type": "number", "minimum": 0, "maximum": 1, "default": 0.8}
                }),
                &["image_path"],
            ),
            tool("get_mouse_position", "Get the current mouse position.", json!({}), &[]),
            tool(
                "wait",
                "Wait for a number of seconds.",
                json!({"seconds": {"type": "number", "minimum": 0}}),
                &["seconds"],
            ),
        ]
    }

    /// Run one tool. Only an unknown name is a [`ToolCallError`]; arguments
    /// that do not fit and everything that goes wrong inside the tool come
    /// back as [`ToolOutcome::Failure`].
    pub fn call(&self, name: &str, args: Value) -> Result<ToolOutcome, ToolCallError> {
        let outcome = match name {
            "take_screenshot" => with_args(args, "Error taking screenshot", |a| self.take_screenshot(a)),
            "click_at" => with_args(args, "Error clicking", |a| self.click_at(a)),
            "move_mouse" => with_args(args, "Error moving mouse", |a| self.move_mouse(a)),
            "drag_mouse" => with_args(args, "Error dragging", |a| self.drag_mouse(a)),
            "type_text" => with_args(args, "Error typing", |a| self.type_text(a)),
            "press_key" => with_args(args, "Error pressing key", |a| self.press_key(a)),
            "scroll" => with_args(args, "Error scrolling", |a| self.scroll(a)),
            "get_screen_size" => with_args(args, "Error getting screen size", |NoArgs {}| {
                outcome(
                    self.backend
                        .screen_size()
                        .map(|(w, h)| format!("Screen size: {w}x{h}"))
                        .map_err(backend_err),
                    "Error getting screen size",
                )
            }),
            "find_on_screen" => with_args(args, "Error finding image", |a| self.find_on_screen(a)),
            "get_mouse_position" => with_args(args, "Error getting mouse position", |NoArgs {}| {
                outcome(
                    self.backend
                        .mouse_position()
                        .map(|(x, y)| format!("Mouse position: ({x}, {y})"))
                        .map_err(backend_err),
                    "Error getting mouse position",
                )
            }),
            "wait" => with_args(args, "Error waiting", |a| self.wait(a)),
            other => return Err(ToolCallError::UnknownTool(other.to_string())),
        };

        match &outcome {
            ToolOutcome::Success(text) => tracing::info!(tool = name, result = %text, "tool succeeded"),
            ToolOutcome::Failure(text) => tracing::warn!(tool = name, result = %text, "tool failed"),
        }
        Ok(outcome)
    }

    fn take_screenshot(&self, args: ScreenshotArgs) -> ToolOutcome {
        let result = (|| -> Result<String, String> {
            let region = match args.region {
                Some([l, t, w, h]) => {
                    let field = |v: i64, n: &str| {
                        u32::try_from(v).map_err(|_| format!("region {n} must be non-negative, got {v}"))
                    };
                    Some(Region {
                        left: field(l, "left")?,
                        top: field(t, "top")?,
                        width: field(w, "width")?,
                        height: field(h, "height")?,
                    })
                }
                None => None,
            };
            let png = self.backend.screenshot_png(region).map_err(backend_err)?;
            let encoded = base64::engine::general_purpose::STANDARD.encode(&png);
            let preview: String = encoded.chars().take(100).collect();
            Ok(format!(
                "Screenshot captured successfully. Base64 data: data:image/png;base64,{preview}..."
            ))
        })();
        outcome(result, "Error taking screenshot")
    }

    fn click_at(&self, args: ClickArgs) -> ToolOutcome {
        let result = (|| -> Result<String, String> {
            let button: MouseButton = args.button.parse()?;
            let clicks = at_least_one(args.clicks, "clicks")?;
            self.backend
                .click(args.x, args.y, button, clicks)
                .map_err(backend_err)?;
            Ok(format!(
                "Clicked at ({}, {}) with {} button, {} times",
                args.x,
                args.y,
                button.as_str(),
                clicks
            ))
        })();
        outcome(result, "Error clicking")
    }

    fn move_mouse(&self, args: MoveArgs) -> ToolOutcome {
        let result = (|| -> Result<String, String> {
            let duration = seconds(args.duration, "duration")?;
            self.backend
                .move_to(args.x, args.y, duration)
                .map_err(backend_err)?;
            Ok(format!("Mouse moved to ({}, {})", args.x, args.y))
        })();
        outcome(result, "Error moving mouse")
    }

    fn drag_mouse(&self, args: DragArgs) -> ToolOutcome {
        let result = (|| -> Result<String, String> {
            let duration = seconds(args.duration, "duration")?;
            self.backend
                .drag((args.start_x, args.start_y), (args.end_x, args.end_y), duration)
                .map_err(backend_err)?;
            Ok(format!(
                "Dragged from ({}, {}) to ({}, {})",
                args.start_x, args.start_y, args.end_x, args.end_y
            ))
        })();
        outcome(result, "Error dragging")
    }

    fn type_text(&self, args: TypeArgs) -> ToolOutcome {
        let result = self
            .backend
            .type_text(&args.text)
            .map(|()| format!("Typed text: '{}'", args.text))
            .map_err(backend_err);
        outcome(result, "Error typing")
    }

    fn press_key(&self, args: KeyArgs) -> ToolOutcome {
        let result = (|| -> Result<String, String> {
            if args.key.contains('+') {
                let keys = parse_combination(&args.key)?;
                self.backend.hotkey(&keys).map_err(backend_err)?;
                return Ok(format!("Pressed key combination: {}", args.key));
            }
            let key = parse_key(&args.key)?;
            let presses = at_least_one(args.presses, "presses")?;
            self.backend
                .press_key(key, presses)
                .map_err(backend_err)?;
            Ok(format!("Pressed '{}' {} times", args.key, presses))
        })();
        outcome(result, "Error pressing key")
    }

    fn scroll(&self, args: ScrollArgs) -> ToolOutcome {
        let result = (|| -> Result<String, String> {
            let direction: ScrollDirection = args.direction.parse()?;
            let clicks = at_least_one(args.clicks, "clicks")?;
            self.backend
                .scroll(clicks, direction)
                .map_err(backend_err)?;
            Ok(format!("Scrolled {} {} clicks", args.direction, clicks))
        })();
        outcome(result, "Error scrolling")
    }

    fn find_on_screen(&self, args: FindArgs) -> ToolOutcome {
        let result = (|| -> Result<String, String> {
            if !(0.0..=1.0).contains(&args.confidence) {
                return Err(format!(
                    "confidence must be between 0 and 1, got {}",
                    args.confidence
                ));
            }
            let template = image::open(&args.image_path)
                .map_err(|e| format!("cannot open '{}': {e}", args.image_path))?
                .to_rgba8();
            let found = self
                .backend
                .locate(&template, args.confidence)
                .map_err(backend_err)?;
            Ok(match found {
                Some((x, y)) => format!("Image found at: ({x}, {y})"),
                None => "Image not found on screen".to_string(),
            })
        })();
        outcome(result, "Error finding image")
    }

    fn wait(&self, args: WaitArgs) -> ToolOutcome {
        let result = seconds(args.seconds, "seconds").map(|d| {
            std::thread::sleep(d);
            format!("Waited {} seconds", args.seconds)
        });
        outcome(result, "Error waiting")
    }
}

/// Missing arguments are treated as an empty object.
fn with_args<T: DeserializeOwned>(
    args: Value,
    failure_prefix: &str,
    run: impl FnOnce(T) -> ToolOutcome,
) -> ToolOutcome {
    let args = if args.is_null() { json!({}) } else { args };
    match serde_json::from_value(args) {
        Ok(parsed) => run(parsed),
        Err(e) => ToolOutcome::Failure(format!("{failure_prefix}: invalid arguments: {e}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::DeskPilotResult;
    use enigo::Key;
    use image::{Rgba, RgbaImage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeBackend {
        actions: Mutex<Vec<String>>,
        fail_input: bool,
    }

    impl FakeBackend {
        fn record(&self, action: String) -> DeskPilotResult<()> {
            if self.fail_input {
                return Err(DeskPilotError::Automation("display unavailable".into()));
            }
            self.actions.lock().unwrap().push(action);
            Ok(())
        }
    }

    impl DesktopBackend for FakeBackend {
        fn click(&self, x: i32, y: i32, button: MouseButton, clicks: u32) -> DeskPilotResult<()> {
            self.record(format!("click {x},{y} {button:?} x{clicks}"))
        }
        fn move_to(&self, x: i32, y: i32, duration: Duration) -> DeskPilotResult<()> {
            self.record(format!("move {x},{y} {}ms", duration.as_millis()))
        }
        fn drag(&self, from: (i32, i32), to: (i32, i32), _: Duration) -> DeskPilotResult<()> {
            self.record(format!("drag {from:?}->{to:?}"))
        }
        fn type_text(&self, text: &str) -> DeskPilotResult<()> {
            self.record(format!("type {text}"))
        }
        fn press_key(&self, key: Key, presses: u32) -> DeskPilotResult<()> {
            self.record(format!("key {key:?} x{presses}"))
        }
        fn hotkey(&self, keys: &[Key]) -> DeskPilotResult<()> {
            self.record(format!("hotkey {keys:?}"))
        }
        fn scroll(&self, clicks: u32, direction: ScrollDirection) -> DeskPilotResult<()> {
            self.record(format!("scroll {direction:?} {clicks}"))
        }
        fn screen_size(&self) -> DeskPilotResult<(u32, u32)> {
            Ok((64, 48))
        }
        fn mouse_position(&self) -> DeskPilotResult<(i32, i32)> {
            Ok((5, 6))
        }
        fn capture(&self) -> DeskPilotResult<RgbaImage> {
            Ok(RgbaImage::from_fn(64, 48, |x, y| {
                if (20..30).contains(&x) && (10..18).contains(&y) {
                    Rgba([(x * 20) as u8, (y * 10) as u8, 200, 255])
                } else {
                    Rgba([0, 0, 0, 255])
                }
            }))
        }
    }

    fn tools() -> (ToolSet, Arc<FakeBackend>) {
        let backend = Arc::new(FakeBackend::default());
        (ToolSet::new(backend.clone()), backend)
    }

    fn ok_text(set: &ToolSet, name: &str, args: Value) -> String {
        match set.call(name, args).unwrap() {
            ToolOutcome::Success(t) => t,
            ToolOutcome::Failure(t) => panic!("{name} failed: {t}"),
        }
    }

    #[test]
    fn catalog_lists_every_tool_once() {
        let names: Vec<_> = ToolSet::catalog().into_iter().map(|t| t.name).collect();
        assert_eq!(
            names,
            vec![
                "take_screenshot",
                "click_at",
                "move_mouse",
                "drag_mouse",
                "type_text",
                "press_key",
                "scroll",
                "get_screen_size",
                "find_on_screen",
                "get_mouse_position",
                "wait"
            ]
        );
    }

    #[test]
    fn click_uses_defaults() {
        let (set, backend) = tools();
        assert_eq!(
            ok_text(&set, "click_at", json!({"x": 100, "y": 200})),
            "Clicked at (100, 200) with left button, 1 times"
        );
        assert_eq!(backend.actions.lock().unwrap()[0], "click 100,200 Left x1");
    }

    #[test]
    fn invalid_values_are_tool_failures() {
        let (set, backend) = tools();
        let out = set
            .call("click_at", json!({"x": 1, "y": 2, "button": "thumb"}))
            .unwrap();
        assert!(!out.is_success());
        assert!(out.text().starts_with("Error clicking: invalid button 'thumb'"));

        let out = set.call("scroll", json!({"clicks": 0})).unwrap();
        assert!(out.text().starts_with("Error scrolling: clicks must be at least 1"));

        let out = set.call("wait", json!({"seconds": -1})).unwrap();
        assert!(out.text().starts_with("Error waiting:"));

        let out = set.call("move_mouse", json!({"x": 1, "y": 1, "duration": -0.5})).unwrap();
        assert!(out.text().starts_with("Error moving mouse:"));
        assert!(backend.actions.lock().unwrap().is_empty());
    }

    #[test]
    fn numeric_strings_and_integral_floats_are_accepted() {
        let (set, backend) = tools();
        assert_eq!(
            ok_text(&set, "click_at", json!({"x": "100", "y": "200"})),
            "Clicked at (100, 200) with left button, 1 times"
        );
        assert_eq!(
            ok_text(&set, "click_at", json!({"x": 100.0, "y": 200.0, "clicks": "2"})),
            "Clicked at (100, 200) with left button, 2 times"
        );
        assert_eq!(
            ok_text(&set, "wait", json!({"seconds": "0"})),
            "Waited 0 seconds"
        );
        let actions = backend.actions.lock().unwrap();
        assert_eq!(actions[0], "click 100,200 Left x1");
        assert_eq!(actions[1], "click 100,200 Left x2");
    }

    #[test]
    fn wrong_argument_types_never_reach_the_tool() {
        let (set, backend) = tools();
        let out = set.call("click_at", json!({"x": "ten", "y": 2})).unwrap();
        assert!(!out.is_success());
        assert!(out.text().starts_with("Error clicking: invalid arguments:"), "{}", out.text());

        let out = set.call("click_at", json!({"x": 10.5, "y": 2})).unwrap();
        assert!(out.text().starts_with("Error clicking: invalid arguments:"));

        let out = set.call("type_text", json!({})).unwrap();
        assert!(out.text().starts_with("Error typing: invalid arguments:"));
        assert!(out.text().contains("text"));

        let out = set.call("get_screen_size", json!({"display": 2})).unwrap();
        assert!(out.text().starts_with("Error getting screen size: invalid arguments:"));
        assert!(backend.actions.lock().unwrap().is_empty());

        assert!(matches!(
            set.call("launch_rocket", json!({})),
            Err(ToolCallError::UnknownTool(_))
        ));
    }

    #[test]
    fn key_presses_and_combinations() {
        let (set, backend) = tools();
        assert_eq!(
            ok_text(&set, "press_key", json!({"key": "enter", "presses": 2})),
            "Pressed 'enter' 2 times"
        );
        assert_eq!(
            ok_text(&set, "press_key", json!({"key": "ctrl+c"})),
            "Pressed key combination: ctrl+c"
        );
        let actions = backend.actions.lock().unwrap();
        assert_eq!(actions[0], "key Return x2");
        assert_eq!(actions[1], format!("hotkey {:?}", [Key::Control, Key::Unicode('c')]));
    }

    #[test]
    fn movement_texts() {
        let (set, backend) = tools();
        assert_eq!(
            ok_text(&set, "move_mouse", json!({"x": 3, "y": 4})),
            "Mouse moved to (3, 4)"
        );
        assert_eq!(
            ok_text(
                &set,
                "drag_mouse",
                json!({"start_x": 1, "start_y": 2, "end_x": 30, "end_y": 40})
            ),
            "Dragged from (1, 2) to (30, 40)"
        );
        assert_eq!(
            ok_text(&set, "scroll", json!({"clicks": 3, "direction": "up"})),
            "Scrolled up 3 clicks"
        );
        assert_eq!(
            ok_text(&set, "type_text", json!({"text": "hello"})),
            "Typed text: 'hello'"
        );
        let actions = backend.actions.lock().unwrap();
        assert_eq!(actions[0], "move 3,4 250ms");
        assert_eq!(actions[1], "drag (1, 2)->(30, 40)");
    }

    #[test]
    fn read_only_tools() {
        let (set, backend) = tools();
        let size = ok_text(&set, "get_screen_size", Value::Null);
        assert_eq!(size, "Screen size: 64x48");
        assert_eq!(ok_text(&set, "get_screen_size", json!({})), size);

        let position = ok_text(&set, "get_mouse_position", json!({}));
        assert_eq!(position, "Mouse position: (5, 6)");
        assert_eq!(ok_text(&set, "get_mouse_position", Value::Null), position);
        assert!(backend.actions.lock().unwrap().is_empty());
    }

    #[test]
    fn screenshot_reports_truncated_preview() {
        let (set, _) = tools();
        let text = ok_text(&set, "take_screenshot", json!({}));
        let prefix = "Screenshot captured successfully. Base64 data: data:image/png;base64,";
        assert!(text.starts_with(prefix));
        assert!(text.ends_with("..."));
        assert_eq!(text.len(), prefix.len() + 100 + 3);

        let out = set
            .call("take_screenshot", json!({"region": [100, 100, 5, 5]}))
            .unwrap();
        assert!(out.text().starts_with("Error taking screenshot:"));
    }

    #[test]
    fn find_on_screen_reports_center() {
        let (set, backend) = tools();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("patch.png");
        let shot = backend.capture().unwrap();
        image::imageops::crop_imm(&shot, 18, 8, 14, 12)
            .to_image()
            .save(&path)
            .unwrap();

        let text = ok_text(
            &set,
            "find_on_screen",
            json!({"image_path": path.to_string_lossy()}),
        );
        assert_eq!(text, "Image found at: (25, 14)");

        let out = set
            .call("find_on_screen", json!({"image_path": dir.path().join("missing.png").to_string_lossy()}))
            .unwrap();
        assert!(out.text().starts_with("Error finding image: cannot open"));
    }

    #[test]
    fn backend_errors_become_failure_text() {
        let backend = Arc::new(FakeBackend {
            fail_input: true,
            ..Default::default()
        });
        let set = ToolSet::new(backend);
        let out = set.call("type_text", json!({"text": "x"})).unwrap();
        assert_eq!(out, ToolOutcome::Failure("Error typing: display unavailable".into()));
    }

    #[test]
    fn wait_formats_seconds() {
        let (set, _) = tools();
        assert_eq!(ok_text(&set, "wait", json!({"seconds": 0})), "Waited 0 seconds");
        assert_eq!(ok_text(&set, "wait", json!({"seconds": 0.01})), "Waited 0.01 seconds");
    }
}
