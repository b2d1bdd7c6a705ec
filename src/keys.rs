use std::collections::HashMap;

/// Maps key names in the model's vocabulary ("cmd", "arrowdown") to the
/// automation surface's vocabulary ("Meta", "ArrowDown"). Lookup is
/// case-insensitive; unmapped names pass through unchanged.
#[derive(Debug, Clone)]
pub struct KeyMap {
    entries: HashMap<String, String>,
}

const MODEL_TO_SURFACE: &[(&str, &str)] = &[
    ("/", "Divide"),
    ("\\", "Backslash"),
    ("alt", "Alt"),
    ("arrowdown", "ArrowDown"),
    ("arrowleft", "ArrowLeft"),
    ("arrowright", "ArrowRight"),
    ("arrowup", "ArrowUp"),
    ("backspace", "Backspace"),
    ("capslock", "CapsLock"),
    ("cmd", "Meta"),
    ("ctrl", "Control"),
    ("delete", "Delete"),
    ("end", "End"),
    ("enter", "Enter"),
    ("esc", "Escape"),
    ("home", "Home"),
    ("insert", "Insert"),
    ("option", "Alt"),
    ("pagedown", "PageDown"),
    ("pageup", "PageUp"),
    ("shift", "Shift"),
    ("space", " "),
    ("super", "Meta"),
    ("tab", "Tab"),
    ("win", "Meta"),
];

impl Default for KeyMap {
    fn default() -> Self {
        Self::from_pairs(MODEL_TO_SURFACE.iter().copied())
    }
}

impl KeyMap {
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let entries = pairs
            .into_iter()
            .map(|(from, to)| (from.to_lowercase(), to.to_string()))
            .collect();
        Self { entries }
    }

    pub fn translate(&self, key: &str) -> String {
        self.entries
            .get(&key.to_lowercase())
            .cloned()
            .unwrap_or_else(|| key.to_string())
    }
}
