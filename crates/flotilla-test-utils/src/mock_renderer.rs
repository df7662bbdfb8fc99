// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Renderer that records what it was asked to render.

use std::sync::Mutex;

use flotilla_core::types::RenderContext;
use flotilla_core::{PlaceholderRenderer, TemplateRenderer};

/// Delegates to [`PlaceholderRenderer`] and keeps every `(template, recipient)` pair.
#[derive(Default)]
pub struct MockRenderer {
    calls: Mutex<Vec<(String, String)>>,
}

impl MockRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl TemplateRenderer for MockRenderer {
    fn render(&self, template: &str, ctx: &RenderContext<'_>) -> String {
        self.calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((template.to_string(), ctx.recipient.to_string()));
        PlaceholderRenderer.render(template, ctx)
    }
}
