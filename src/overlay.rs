//! Overlay state machine for a blocked media element: Hidden ⇄ Revealed.
//!
//! Hidden: overlay panel shown, media transparent and non-interactive.
//! Revealed: panel gone, media visible and interactive, a small "Hide"
//! control shown. Transitions only happen on user clicks; repeating the
//! current state is a no-op.
//!
//! The overlay is owned by its own buttons' click handlers and refers to
//! the DOM only weakly, so it disappears with the elements.

use std::fmt;
use std::sync::{Arc, Weak};

use parking_lot::RwLock;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::classify::Verdict;
use crate::dom::{Display, Document, Element, PointerEvents, Position};
use crate::theme::Theme;

pub const OVERLAY_CLASS: &str = "feedguard-overlay";
pub const SHOW_BUTTON_CLASS: &str = "feedguard-show";
pub const HIDE_BUTTON_CLASS: &str = "feedguard-hide";
/// Set to `blocked` on media elements that received an overlay.
pub const BLOCKED_ATTR: &str = "data-feedguard";

const TITLE: &str = "Content Filtered";
const SHOW_LABEL: &str = "Show anyway";
const HIDE_LABEL: &str = "Hide";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum OverlayState {
    Hidden,
    Revealed,
}

impl fmt::Display for OverlayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OverlayState::Hidden => write!(f, "Hidden"),
            OverlayState::Revealed => write!(f, "Revealed"),
        }
    }
}

impl OverlayState {
    pub fn can_transition_to(self, next: OverlayState) -> bool {
        matches!(
            (self, next),
            (OverlayState::Hidden, OverlayState::Revealed)
                | (OverlayState::Revealed, OverlayState::Hidden)
        )
    }
}

pub struct Overlay {
    media: Weak<Element>,
    panel: Weak<Element>,
    hide_control: Weak<Element>,
    reason: String,
    state: RwLock<OverlayState>,
    state_tx: watch::Sender<OverlayState>,
}

impl Overlay {
    /// Cover `media` with a Hidden-state overlay carrying `verdict.reason`.
    /// Returns `None` if the media has no parent to host the overlay.
    pub fn apply(
        doc: &Document,
        media: &Arc<Element>,
        verdict: &Verdict,
        theme: Theme,
    ) -> Option<Arc<Overlay>> {
        let Some(parent) = media.parent() else {
            debug!(element = %media.id(), "overlay skipped, media detached");
            return None;
        };
        if parent.style().position.unwrap_or_default() == Position::Static {
            parent.update_style(|s| s.position = Some(Position::Relative));
        }

        let palette = theme.palette();

        let panel = Element::new("div").with_attr("class", OVERLAY_CLASS);
        panel.update_style(|s| {
            s.position = Some(Position::Absolute);
            s.display = Some(Display::Flex);
            s.background = Some(palette.overlay_bg.to_string());
            s.opacity = Some(1.0);
        });

        let title = Element::new("div");
        title.set_text(TITLE);
        title.update_style(|s| s.color = Some(palette.text.to_string()));

        let reason = Element::new("div");
        reason.set_text(&verdict.reason);
        reason.update_style(|s| s.color = Some(palette.sub_text.to_string()));

        let show_button = Element::new("button").with_attr("class", SHOW_BUTTON_CLASS);
        show_button.set_text(SHOW_LABEL);
        show_button.update_style(|s| {
            s.background = Some(palette.button_bg.to_string());
            s.color = Some(palette.button_text.to_string());
        });

        let hide_control = Element::new("button").with_attr("class", HIDE_BUTTON_CLASS);
        hide_control.set_text(HIDE_LABEL);
        hide_control.update_style(|s| {
            s.position = Some(Position::Absolute);
            s.display = Some(Display::None);
        });

        let (state_tx, _) = watch::channel(OverlayState::Hidden);
        let overlay = Arc::new(Overlay {
            media: Arc::downgrade(media),
            panel: Arc::downgrade(&panel),
            hide_control: Arc::downgrade(&hide_control),
            reason: verdict.reason.clone(),
            state: RwLock::new(OverlayState::Hidden),
            state_tx,
        });
        overlay.render(OverlayState::Hidden);

        let on_show = Arc::clone(&overlay);
        show_button.on_click(Arc::new(move || {
            on_show.reveal();
        }));
        let on_hide = Arc::clone(&overlay);
        hide_control.on_click(Arc::new(move || {
            on_hide.conceal();
        }));

        doc.append_child(&panel, title);
        doc.append_child(&panel, reason);
        doc.append_child(&panel, show_button);
        doc.append_child(&parent, panel);
        doc.append_child(&parent, hide_control);
        media.set_attr(BLOCKED_ATTR, "blocked");

        info!(element = %media.id(), kind = %verdict.kind, "overlay_applied");
        Some(overlay)
    }

    pub fn state(&self) -> OverlayState {
        *self.state.read()
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<OverlayState> {
        self.state_tx.subscribe()
    }

    /// "Show anyway". Returns true if the state changed.
    pub fn reveal(&self) -> bool {
        self.transition(OverlayState::Revealed)
    }

    /// Re-hide a revealed element. Returns true if the state changed.
    pub fn conceal(&self) -> bool {
        self.transition(OverlayState::Hidden)
    }

    fn transition(&self, next: OverlayState) -> bool {
        let mut state = self.state.write();
        let current = *state;
        if !current.can_transition_to(next) {
            debug!(state = %current, "overlay_transition_ignored");
            return false;
        }
        *state = next;
        self.render(next);
        let _ = self.state_tx.send(next);
        info!(from = %current, to = %next, "overlay_transition");
        true
    }

    /// Push `state` onto the DOM. Elements that are already gone are skipped.
    fn render(&self, state: OverlayState) {
        let hidden = state == OverlayState::Hidden;
        if let Some(media) = self.media.upgrade() {
            media.update_style(|s| {
                s.opacity = Some(if hidden { 0.0 } else { 1.0 });
                s.pointer_events = Some(if hidden {
                    PointerEvents::None
                } else {
                    PointerEvents::Auto
                });
            });
        }
        if let Some(panel) = self.panel.upgrade() {
            panel.update_style(|s| {
                s.display = Some(if hidden { Display::Flex } else { Display::None });
                s.opacity = Some(if hidden { 1.0 } else { 0.0 });
            });
        }
        if let Some(control) = self.hide_control.upgrade() {
            control.update_style(|s| {
                s.display = Some(if hidden { Display::None } else { Display::Flex });
            });
        }
    }
}
