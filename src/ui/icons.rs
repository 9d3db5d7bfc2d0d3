//! Shared UI icons.

use console::Emoji;

// Status indicators
pub static CHECK: Emoji<'_, '_> = Emoji("✅ ", "[OK]");
pub static CROSS: Emoji<'_, '_> = Emoji("❌ ", "[FAIL]");
pub static SPARKLE: Emoji<'_, '_> = Emoji("✨ ", "*");
pub static BLOCKER: Emoji<'_, '_> = Emoji("🚧 ", "[BLOCK]");

// Loop indicators
pub static QUEUE: Emoji<'_, '_> = Emoji("📋 ", "[Q]");
pub static TEST: Emoji<'_, '_> = Emoji("🧪 ", "[T]");
pub static COMMIT: Emoji<'_, '_> = Emoji("📦 ", "[C]");
