//! Terminal color palette

use colored::{ColoredString, Colorize};

pub struct Theme;

impl Theme {
    pub fn success(text: &str) -> ColoredString {
        text.green().bold()
    }

    pub fn error(text: &str) -> ColoredString {
        text.red().bold()
    }

    pub fn warning(text: &str) -> ColoredString {
        text.yellow()
    }

    pub fn primary(text: &str) -> ColoredString {
        text.cyan().bold()
    }

    pub fn secondary(text: &str) -> ColoredString {
        text.white()
    }

    pub fn muted(text: &str) -> ColoredString {
        text.bright_black()
    }

    pub fn header(text: &str) -> ColoredString {
        text.bold().underline()
    }

    pub fn value(text: &str) -> ColoredString {
        text.cyan()
    }

    pub fn size(text: &str) -> ColoredString {
        text.magenta()
    }
}
