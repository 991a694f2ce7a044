/*
 * aurjail - Build AUR packages inside a container or chroot jail.
 * Copyright (C) 2025  aurjail contributors
 *
 * This program is free software: you can redistribute it and/or modify
 * it under the terms of the GNU General Public License as published by
 * the Free Software Foundation, either version 3 of the License, or
 * (at your option) any later version.
 *
 * This program is distributed in the hope that it will be useful,
 * but WITHOUT ANY WARRANTY; without even the implied warranty of
 * MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
 * GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License
 * along with this program.  If not, see <https://www.gnu.org/licenses/>.
 */

//! Styled terminal output and interactive questions.

use anyhow::{Context, Result};
use console::style;
use std::io::{self, BufRead, Write};

use crate::error::AurJailError;

/// `:: message`
pub fn log(message: &str) {
    println!("{} {}", style("::").blue().bold(), message);
}

/// `==> message`
pub fn result(message: &str) {
    println!("{} {}", style("==>").green().bold(), style(message).bold());
}

pub fn warning(message: &str) {
    eprintln!("{} {}", style("warning:").yellow().bold(), message);
}

pub fn error(message: &str) {
    eprintln!("{} {}", style("error:").red().bold(), message);
}

/// Answer to a `[y/N/q]` style question
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Confirmation {
    Yes,
    No,
    Quit,
}

impl Confirmation {
    /// Anything but an explicit yes or quit declines
    pub fn parse(answer: &str) -> Self {
        match answer.trim().to_lowercase().as_str() {
            "y" | "yes" => Confirmation::Yes,
            "q" | "quit" => Confirmation::Quit,
            _ => Confirmation::No,
        }
    }

    /// Yes → true, No → false, Quit → [`AurJailError::UserQuit`]
    pub fn accepted(self) -> Result<bool> {
        match self {
            Confirmation::Yes => Ok(true),
            Confirmation::No => Ok(false),
            Confirmation::Quit => Err(AurJailError::UserQuit.into()),
        }
    }
}

/// Source of user answers
pub trait Prompter {
    /// Ask a question and return the lowercased, trimmed answer
    fn ask(&self, question: &str, choices: &str) -> Result<String>;

    /// Print a warning and block until the user hits Enter
    fn pause(&self, message: &str) -> Result<()>;

    fn confirm(&self, question: &str, choices: &str) -> Result<Confirmation> {
        Ok(Confirmation::parse(&self.ask(question, choices)?))
    }
}

/// Reads answers from stdin
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn ask(&self, question: &str, choices: &str) -> Result<String> {
        print!(
            "{} {} {} > ",
            style("::").blue().bold(),
            style(question).bold(),
            choices
        );
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin()
            .lock()
            .read_line(&mut input)
            .context("Failed to read answer")?;
        Ok(input.trim().to_lowercase())
    }

    fn pause(&self, message: &str) -> Result<()> {
        warning(message);
        let mut input = String::new();
        io::stdin().lock().read_line(&mut input)?;
        Ok(())
    }
}
