//! Confirmation state machines for irreversible deletions.
//!
//! Neither gate touches a terminal or the filesystem. Answers come from a
//! [`Prompter`], so any answer sequence can be replayed in tests.

use std::collections::VecDeque;
use std::io::{BufRead, Write};

use anyhow::{anyhow, Context, Result};
use kernelle_core::Decision;

pub trait Prompter {
    /// Returns the user's yes/no answer. `default` is what an empty answer
    /// means; `None` forces an explicit answer.
    fn ask(&mut self, prompt: &str, default: Option<bool>) -> Result<bool>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Question {
    pub prompt: &'static str,
    pub default: Option<bool>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateStep {
    KeepInsights,
    FirstConfirmation,
    FinalCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Asking(GateStep),
    Decided(Decision),
}

/// Three-step gate: only three consecutive answers in favour of deletion
/// reach [`Decision::Delete`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TripleCheck {
    leaning: Decision,
    state: GateState,
}

impl TripleCheck {
    pub fn new(leaning: Decision) -> Self {
        Self {
            leaning,
            state: GateState::Asking(GateStep::KeepInsights),
        }
    }

    pub fn state(&self) -> GateState {
        self.state
    }

    pub fn question(&self) -> Option<Question> {
        let GateState::Asking(step) = self.state else {
            return None;
        };
        Some(match step {
            GateStep::KeepInsights => Question {
                prompt: "Keep your insights? They will be moved to a backup outside the kernelle home.",
                default: Some(self.leaning == Decision::Preserve),
            },
            GateStep::FirstConfirmation => Question {
                prompt: "Are you SURE you want to delete all insights? (first confirmation)",
                default: None,
            },
            GateStep::FinalCheck => Question {
                prompt: "FINAL CHECK: delete all insights forever? This cannot be undone.",
                default: Some(false),
            },
        })
    }

    /// Applies one answer. `yes` is the literal answer to the current question.
    pub fn answer(&mut self, yes: bool) -> GateState {
        self.state = match self.state {
            GateState::Asking(GateStep::KeepInsights) if yes => {
                GateState::Decided(Decision::Preserve)
            }
            GateState::Asking(GateStep::KeepInsights) => {
                GateState::Asking(GateStep::FirstConfirmation)
            }
            GateState::Asking(GateStep::FirstConfirmation) if yes => {
                GateState::Asking(GateStep::FinalCheck)
            }
            GateState::Asking(GateStep::FinalCheck) if yes => GateState::Decided(Decision::Delete),
            GateState::Asking(_) => GateState::Decided(Decision::Preserve),
            decided @ GateState::Decided(_) => decided,
        };
        self.state
    }

    pub fn run(mut self, prompter: &mut dyn Prompter) -> Result<Decision> {
        loop {
            if let GateState::Decided(decision) = self.state {
                return Ok(decision);
            }
            let Some(question) = self.question() else {
                return Err(anyhow!("confirmation gate stalled without a question"));
            };
            let yes = prompter.ask(question.prompt, question.default)?;
            self.answer(yes);
        }
    }
}

pub fn decide(leaning: Decision, prompter: &mut dyn Prompter) -> Result<Decision> {
    TripleCheck::new(leaning).run(prompter)
}

/// Single-step variant: one question, keeping is the default.
pub fn confirm_keep(prompter: &mut dyn Prompter, prompt: &str) -> Result<Decision> {
    let keep = prompter.ask(prompt, Some(true))?;
    Ok(if keep {
        Decision::Preserve
    } else {
        Decision::Delete
    })
}

pub fn parse_answer(raw: &str, default: Option<bool>) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" => Some(true),
        "n" | "no" => Some(false),
        "" => default,
        _ => None,
    }
}

/// Reads answers line by line, asking again until one parses.
pub struct LinePrompter<R, W> {
    input: R,
    output: W,
}

impl<R: BufRead, W: Write> LinePrompter<R, W> {
    pub fn new(input: R, output: W) -> Self {
        Self { input, output }
    }

    pub fn into_output(self) -> W {
        self.output
    }
}

impl<R: BufRead, W: Write> Prompter for LinePrompter<R, W> {
    fn ask(&mut self, prompt: &str, default: Option<bool>) -> Result<bool> {
        let hint = match default {
            Some(true) => "[Y/n]",
            Some(false) => "[y/N]",
            None => "[y/n]",
        };
        loop {
            write!(self.output, "{prompt} {hint} ").context("failed to write prompt")?;
            self.output.flush().context("failed to flush prompt")?;

            let mut line = String::new();
            let read = self
                .input
                .read_line(&mut line)
                .context("failed to read answer")?;
            if read == 0 {
                return Err(anyhow!("input closed before answering: {prompt}"));
            }
            if let Some(answer) = parse_answer(&line, default) {
                return Ok(answer);
            }
            writeln!(self.output, "Please answer 'y' or 'n'.")
                .context("failed to write prompt")?;
        }
    }
}

/// Replays a fixed answer sequence and records what was asked.
#[derive(Debug, Default)]
pub struct ScriptedPrompter {
    answers: VecDeque<bool>,
    asked: Vec<(String, Option<bool>)>,
}

impl ScriptedPrompter {
    pub fn new(answers: impl IntoIterator<Item = bool>) -> Self {
        Self {
            answers: answers.into_iter().collect(),
            asked: Vec::new(),
        }
    }

    pub fn asked(&self) -> &[(String, Option<bool>)] {
        &self.asked
    }

    pub fn remaining(&self) -> usize {
        self.answers.len()
    }
}

impl Prompter for ScriptedPrompter {
    fn ask(&mut self, prompt: &str, default: Option<bool>) -> Result<bool> {
        self.asked.push((prompt.to_string(), default));
        self.answers
            .pop_front()
            .ok_or_else(|| anyhow!("no scripted answer left for: {prompt}"))
    }
}
