//! Terminal styling for help output and status lines.

use std::sync::LazyLock;

use clap::builder::styling::{AnsiColor, Effects, Styles};
use console::{style, StyledObject};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// A green check mark.
pub static CHECKMARK: LazyLock<StyledObject<&'static str>> =
    LazyLock::new(|| style("✓").green().bold());

/// A red cross.
pub static CROSS: LazyLock<StyledObject<&'static str>> = LazyLock::new(|| style("✗").red().bold());

/// A yellow exclamation mark.
pub static WARNING: LazyLock<StyledObject<&'static str>> =
    LazyLock::new(|| style("!").yellow().bold());

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Styles strings the same way clap styles its help output.
pub trait AnsiStyles {
    /// Styles a literal, e.g. a flag or command name.
    fn literal(&self) -> String;

    /// Styles a placeholder value.
    fn placeholder(&self) -> String;

    /// Styles a section header.
    fn header(&self) -> String;

    /// Styles an error message.
    fn error(&self) -> String;
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The styles used by the `funserver` help output.
pub fn styles() -> Styles {
    Styles::styled()
        .header(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .usage(AnsiColor::Yellow.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default() | Effects::BOLD)
        .placeholder(AnsiColor::Cyan.on_default())
        .error(AnsiColor::Red.on_default() | Effects::BOLD)
        .valid(AnsiColor::Green.on_default())
        .invalid(AnsiColor::Red.on_default())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl<T: AsRef<str>> AnsiStyles for T {
    fn literal(&self) -> String {
        style(self.as_ref()).green().bold().to_string()
    }

    fn placeholder(&self) -> String {
        style(self.as_ref()).cyan().to_string()
    }

    fn header(&self) -> String {
        style(self.as_ref()).yellow().bold().to_string()
    }

    fn error(&self) -> String {
        style(self.as_ref()).red().bold().to_string()
    }
}
