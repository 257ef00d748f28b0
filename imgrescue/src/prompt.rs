use anyhow::Result;
use dialoguer::{Confirm, Input, Select, theme::ColorfulTheme};
use imgrescue_core::catalog::ImageStanza;
use imgrescue_core::download::RepeatChoice;
use imgrescue_core::select::Prompter;

/// [`Prompter`] on the controlling terminal.
pub struct TerminalPrompter {
    theme: ColorfulTheme,
}

impl TerminalPrompter {
    pub fn new() -> Self {
        Self {
            theme: ColorfulTheme::default(),
        }
    }
}

impl Prompter for TerminalPrompter {
    fn say(&mut self, text: &str) {
        println!("{text}");
    }

    fn ask(&mut self, prompt: &str) -> Result<String> {
        let answer = Input::<String>::with_theme(&self.theme)
            .with_prompt(prompt)
            .allow_empty(true)
            .interact_text()?;
        Ok(answer)
    }

    fn confirm(&mut self, prompt: &str) -> Result<bool> {
        let answer = Confirm::with_theme(&self.theme)
            .with_prompt(prompt)
            .default(true)
            .interact()?;
        Ok(answer)
    }
}

/// Asks what to do about an image that the previous run already fetched.
pub fn ask_repeat(stanza: &ImageStanza) -> RepeatChoice {
    println!(
        "You already downloaded {} during a previous run.",
        stanza.name
    );
    let items = [
        "Quit",
        "Download it again",
        "Start over and choose a different image",
    ];
    let selection = Select::with_theme(&ColorfulTheme::default())
        .with_prompt("What would you like to do?")
        .items(&items)
        .default(1)
        .interact();

    match selection {
        Ok(1) => RepeatChoice::Redownload,
        Ok(2) => RepeatChoice::Restart,
        _ => RepeatChoice::Quit,
    }
}

/// Presents a final "Yes/No" confirmation to the user.
pub fn confirm_operation(prompt: &str) -> Result<bool> {
    let confirmation = Confirm::with_theme(&ColorfulTheme::default())
        .with_prompt(prompt)
        .default(false)
        .interact()?;

    Ok(confirmation)
}
