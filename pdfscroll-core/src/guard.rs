//! Suppression of native zoom gestures while zoom is disabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers {
    pub ctrl: bool,
    pub meta: bool,
    pub alt: bool,
    pub shift: bool,
}

impl Modifiers {
    pub const NONE: Modifiers = Modifiers {
        ctrl: false,
        meta: false,
        alt: false,
        shift: false,
    };
    pub const CTRL: Modifiers = Modifiers {
        ctrl: true,
        ..Modifiers::NONE
    };
    pub const META: Modifiers = Modifiers {
        meta: true,
        ..Modifiers::NONE
    };

    /// Ctrl on most platforms, Cmd on macOS.
    pub fn zoom_modifier(&self) -> bool {
        self.ctrl || self.meta
    }
}

/// Raw input that may carry a zoom intent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    /// Negative `delta_y` scrolls up.
    Wheel { delta_y: f32, modifiers: Modifiers },
    Touch { contacts: usize },
    /// Platform pinch gesture; `scale > 1` spreads the fingers.
    Pinch { scale: f32 },
    Key { key: char, modifiers: Modifiers },
}

impl Gesture {
    pub fn is_zoom(&self) -> bool {
        match *self {
            Gesture::Wheel { modifiers, .. } => modifiers.zoom_modifier(),
            Gesture::Touch { contacts } => contacts > 1,
            Gesture::Pinch { .. } => true,
            Gesture::Key { key, modifiers } => {
                modifiers.zoom_modifier() && matches!(key, '+' | '=' | '-' | '0')
            }
        }
    }

    /// What a passed-through zoom gesture asks the viewer to do.
    pub fn zoom_intent(&self) -> Option<ZoomIntent> {
        if !self.is_zoom() {
            return None;
        }
        match *self {
            Gesture::Wheel { delta_y, .. } if delta_y < 0.0 => Some(ZoomIntent::In),
            Gesture::Wheel { delta_y, .. } if delta_y > 0.0 => Some(ZoomIntent::Out),
            Gesture::Pinch { scale } if scale > 1.0 => Some(ZoomIntent::In),
            Gesture::Pinch { scale } if scale < 1.0 => Some(ZoomIntent::Out),
            Gesture::Key { key: '+' | '=', .. } => Some(ZoomIntent::In),
            Gesture::Key { key: '-', .. } => Some(ZoomIntent::Out),
            Gesture::Key { key: '0', .. } => Some(ZoomIntent::Reset),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoomIntent {
    In,
    Out,
    /// Back to the page's natural size.
    Reset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GestureDisposition {
    PassThrough,
    Suppress,
}

/// Reads the zoom policy on every event, so toggling it takes effect at once.
#[derive(Debug, Clone)]
pub struct InteractionGuard {
    zoom_enabled: Arc<AtomicBool>,
}

impl InteractionGuard {
    pub fn new(zoom_enabled: Arc<AtomicBool>) -> Self {
        Self { zoom_enabled }
    }

    pub fn filter(&self, gesture: &Gesture) -> GestureDisposition {
        if gesture.is_zoom() && !self.zoom_enabled.load(Ordering::SeqCst) {
            GestureDisposition::Suppress
        } else {
            GestureDisposition::PassThrough
        }
    }
}
