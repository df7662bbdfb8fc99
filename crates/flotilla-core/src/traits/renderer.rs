// SPDX-FileCopyrightText: 2026 Flotilla Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Template rendering capability.

use crate::types::RenderContext;

/// Turns a stored template into the final text for one recipient.
///
/// The engine treats the output as opaque; variation and personalization
/// live entirely in the implementation.
pub trait TemplateRenderer: Send + Sync + 'static {
    fn render(&self, template: &str, ctx: &RenderContext<'_>) -> String;
}

/// Substitutes `{name}` and `{phone}` and leaves everything else untouched.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaceholderRenderer;

impl TemplateRenderer for PlaceholderRenderer {
    fn render(&self, template: &str, ctx: &RenderContext<'_>) -> String {
        template
            .replace("{name}", ctx.recipient_name)
            .replace("{phone}", ctx.recipient)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::DeviceId;

    #[test]
    fn placeholders_are_substituted() {
        let device = DeviceId::from("d1");
        let ctx = RenderContext {
            recipient_name: "Ana",
            device_id: &device,
            recipient: "+15550001",
        };
        let out = PlaceholderRenderer.render("Hi {name}, reply to {phone}", &ctx);
        assert_eq!(out, "Hi Ana, reply to +15550001");
    }
}
