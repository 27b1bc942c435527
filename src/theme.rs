//! Light/dark palette for overlays, derived from the page background.
//! The brightness reading is cached for 10s so a burst of overlays does not
//! re-read the body style each time.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

use crate::dom::Document;

pub const DEFAULT_THEME_CACHE: Duration = Duration::from_secs(10);

/// Perceived brightness above which the page counts as light.
const LIGHT_THRESHOLD: f64 = 125.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Theme {
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Palette {
    pub overlay_bg: &'static str,
    pub text: &'static str,
    pub sub_text: &'static str,
    pub button_bg: &'static str,
    pub button_text: &'static str,
}

impl Theme {
    /// Classify a CSS color such as `rgb(255, 255, 255)`. Anything without
    /// three numeric components is treated as dark.
    pub fn from_background(css: Option<&str>) -> Theme {
        let channels: Vec<f64> = css
            .unwrap_or_default()
            .split(|c: char| !c.is_ascii_digit())
            .filter(|part| !part.is_empty())
            .take(3)
            .filter_map(|part| part.parse().ok())
            .collect();
        match channels.as_slice() {
            [r, g, b] if (r * 299.0 + g * 587.0 + b * 114.0) / 1000.0 > LIGHT_THRESHOLD => {
                Theme::Light
            }
            _ => Theme::Dark,
        }
    }

    pub fn palette(self) -> Palette {
        match self {
            Theme::Dark => Palette {
                overlay_bg: "rgba(0, 0, 0, 0.75)",
                text: "#E7E9EA",
                sub_text: "#71767B",
                button_bg: "#EFF3F4",
                button_text: "#0F1419",
            },
            Theme::Light => Palette {
                overlay_bg: "rgba(255, 255, 255, 0.85)",
                text: "#0F1419",
                sub_text: "#536471",
                button_bg: "#0F1419",
                button_text: "#FFFFFF",
            },
        }
    }
}

pub struct ThemeCache {
    ttl: Duration,
    cached: Mutex<Option<(Theme, Instant)>>,
}

impl ThemeCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            cached: Mutex::new(None),
        }
    }

    pub fn current(&self, doc: &Document) -> Theme {
        let mut cached = self.cached.lock();
        if let Some((theme, at)) = *cached {
            if at.elapsed() < self.ttl {
                return theme;
            }
        }
        let theme = Theme::from_background(doc.body().style().background.as_deref());
        *cached = Some((theme, Instant::now()));
        theme
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn brightness_picks_theme() {
        assert_eq!(Theme::from_background(Some("rgb(255, 255, 255)")), Theme::Light);
        assert_eq!(Theme::from_background(Some("rgb(21, 32, 43)")), Theme::Dark);
        assert_eq!(Theme::from_background(Some("transparent")), Theme::Dark);
        assert_eq!(Theme::from_background(None), Theme::Dark);
    }

    #[tokio::test(start_paused = true)]
    async fn brightness_is_cached_for_ttl() {
        let doc = Document::new();
        doc.body()
            .update_style(|s| s.background = Some("rgb(255, 255, 255)".into()));
        let cache = ThemeCache::new(DEFAULT_THEME_CACHE);
        assert_eq!(cache.current(&doc), Theme::Light);

        doc.body()
            .update_style(|s| s.background = Some("rgb(0, 0, 0)".into()));
        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(cache.current(&doc), Theme::Light);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(cache.current(&doc), Theme::Dark);
    }
}
