//! Interactive choosers for the image and the target drive.
//!
//! Both choosers share one paginated state machine, [`Pager`]. It shows a
//! window of at most [`PAGE_SIZE`] numbered entries and interprets one line
//! of input at a time:
//!
//! | input            | outcome                                   |
//! |------------------|-------------------------------------------|
//! | empty or `?`     | show the current page again               |
//! | `m`              | next page, wrapping to the first          |
//! | `0`              | quit                                      |
//! | `1..=count`      | that entry is selected                    |
//! | other number     | "not one of the choices", same page       |
//! | anything else    | "didn't understand", same page            |
use crate::catalog::Catalog;
use crate::device::Device;
use crate::platform::DeviceSource;
use crate::state::{SelectionState, StateStore};
use anyhow::Result;
use std::ops::Range;
use tracing::{debug, info};

pub const PAGE_SIZE: usize = 40;

/// Terminal interaction, supplied by the front-end.
pub trait Prompter {
    /// Shows one line of text.
    fn say(&mut self, text: &str);
    /// Blocks until the user enters a line.
    fn ask(&mut self, prompt: &str) -> Result<String>;
    /// Blocks until the user answers yes or no.
    fn confirm(&mut self, prompt: &str) -> Result<bool>;
}

/// The result of a chooser.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Choice<T> {
    Selected(T),
    Quit,
}

/// What one line of input did to the pager.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Reshow,
    Advance,
    /// 1-based index of the chosen entry.
    Selected(usize),
    Cancelled,
    NotUnderstood,
    OutOfRange,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Pager {
    count: usize,
    min: usize,
    max: usize,
}

impl Pager {
    pub fn new(count: usize) -> Self {
        Self {
            count,
            min: 0,
            max: count.min(PAGE_SIZE),
        }
    }

    /// The 0-based indices on the current page.
    pub fn window(&self) -> Range<usize> {
        self.min..self.max
    }

    /// Whether there is more than one page.
    pub fn has_more(&self) -> bool {
        self.count > PAGE_SIZE
    }

    fn advance(&mut self) {
        self.min = if self.max >= self.count { 0 } else { self.max };
        self.max = (self.min + PAGE_SIZE).min(self.count);
    }

    /// Interprets one line of input.
    pub fn handle(&mut self, input: &str) -> Outcome {
        let input = input.trim();
        match input {
            "" | "?" => Outcome::Reshow,
            "m" => {
                self.advance();
                Outcome::Advance
            }
            _ => match input.parse::<usize>() {
                Err(_) => Outcome::NotUnderstood,
                Ok(0) => Outcome::Cancelled,
                Ok(n) if n <= self.count => Outcome::Selected(n),
                Ok(_) => Outcome::OutOfRange,
            },
        }
    }
}

fn show_page(
    prompter: &mut dyn Prompter,
    pager: &Pager,
    title: &str,
    label: impl Fn(usize) -> String,
) {
    prompter.say("");
    prompter.say(title);
    for i in pager.window() {
        prompter.say(&format!("{:>4} - {}", i + 1, label(i)));
    }
    if pager.has_more() {
        prompter.say("   m - more choices");
    }
    prompter.say("   0 - quit");
}

/// Reports a rejected line; returns `true` if the outcome was one.
fn explain(prompter: &mut dyn Prompter, outcome: Outcome, input: &str) -> bool {
    match outcome {
        Outcome::NotUnderstood => {
            prompter.say("Sorry, I didn't understand your response.");
            true
        }
        Outcome::OutOfRange => {
            prompter.say(&format!("Sorry, {} is not one of the choices.", input.trim()));
            true
        }
        _ => false,
    }
}

/// Lets the user pick an image and remembers the pick for the next run.
///
/// Returns the 1-based catalog index.
pub fn select_image(
    catalog: &Catalog,
    store: &StateStore,
    prompter: &mut dyn Prompter,
) -> Result<Choice<usize>> {
    let saved = store.load_selection()?;
    if saved.has_run {
        if let Some(record) = catalog.by_choice(saved.last_index) {
            let question = format!("Use the image you chose last time ({})?", record.name);
            if prompter.confirm(&question)? {
                info!("reusing saved choice {}", saved.last_index);
                return Ok(Choice::Selected(saved.last_index));
            }
        }
    }

    let title = "Select the image you want to write:";
    let label = |i: usize| catalog.records[i].name.clone();
    let mut pager = Pager::new(catalog.records.len());
    show_page(prompter, &pager, title, label);

    loop {
        let input = prompter.ask("Please select an option")?;
        let outcome = pager.handle(&input);
        debug!("image prompt: {:?} -> {:?}", input, outcome);
        if explain(prompter, outcome, &input) {
            continue;
        }
        match outcome {
            Outcome::Selected(n) => {
                store.save_selection(SelectionState {
                    has_run: true,
                    last_index: n,
                })?;
                return Ok(Choice::Selected(n));
            }
            Outcome::Cancelled => return Ok(Choice::Quit),
            _ => show_page(prompter, &pager, title, label),
        }
    }
}

/// Lets the user pick the drive to overwrite.
///
/// The device list is rescanned every time the page is shown again, so the
/// user can plug a drive in while the prompt waits. `required_mb` is only
/// shown as a hint.
pub fn select_drive(
    source: &dyn DeviceSource,
    required_mb: u64,
    prompter: &mut dyn Prompter,
) -> Result<Choice<Device>> {
    let title = "Select the drive to write the recovery image to:";

    loop {
        let devices = source.list()?;
        info!("found {} removable drive(s)", devices.len());
        let label = |i: usize| devices[i].to_string();
        let mut pager = Pager::new(devices.len());

        prompter.say("");
        prompter.say(&format!(
            "The drive must hold at least {required_mb} MB. Everything on it will be erased."
        ));
        if devices.is_empty() {
            prompter.say("No removable drive found. Insert one and press Enter to rescan.");
            prompter.say("   0 - quit");
        } else {
            show_page(prompter, &pager, title, label);
        }

        loop {
            let input = prompter.ask("Please select an option")?;
            let outcome = pager.handle(&input);
            debug!("drive prompt: {:?} -> {:?}", input, outcome);
            if explain(prompter, outcome, &input) {
                continue;
            }
            match outcome {
                Outcome::Selected(n) => return Ok(Choice::Selected(devices[n - 1].clone())),
                Outcome::Cancelled => return Ok(Choice::Quit),
                Outcome::Advance if !devices.is_empty() => show_page(prompter, &pager, title, label),
                _ => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ImageStanza;
    use anyhow::anyhow;
    use std::cell::RefCell;
    use std::collections::VecDeque;
    use std::path::PathBuf;

    #[derive(Default)]
    struct ScriptedPrompter {
        pub inputs: VecDeque<String>,
        pub answers: VecDeque<bool>,
        pub output: Vec<String>,
    }

    impl ScriptedPrompter {
        pub fn new(inputs: &[&str]) -> Self {
            Self {
                inputs: inputs.iter().map(|s| s.to_string()).collect(),
                ..Default::default()
            }
        }

        fn printed(&self, needle: &str) -> usize {
            self.output.iter().filter(|l| l.contains(needle)).count()
        }
    }

    impl Prompter for ScriptedPrompter {
        fn say(&mut self, text: &str) {
            self.output.push(text.to_string());
        }

        fn ask(&mut self, _prompt: &str) -> Result<String> {
            self.inputs.pop_front().ok_or_else(|| anyhow!("script ran out of input"))
        }

        fn confirm(&mut self, _prompt: &str) -> Result<bool> {
            self.answers.pop_front().ok_or_else(|| anyhow!("script ran out of answers"))
        }
    }

    fn catalog(count: usize) -> Catalog {
        let records = (1..=count)
            .map(|i| ImageStanza {
                name: format!("Board {i}"),
                file: format!("board{i}.bin"),
                zip_file_size: 1,
                file_size: 1,
                url: format!("http://x/board{i}.zip"),
                md5: Some("00".into()),
                sha1: None,
            })
            .collect();
        Catalog {
            records,
            valid: true,
            count,
        }
    }

    struct Rescans(RefCell<VecDeque<Vec<Device>>>);

    impl DeviceSource for Rescans {
        fn list(&self) -> Result<Vec<Device>> {
            Ok(self.0.borrow_mut().pop_front().unwrap_or_default())
        }
    }

    fn usb(name: &str) -> Device {
        Device {
            path: PathBuf::from("/dev").join(name),
            name: name.to_string(),
            size_mb: 7633,
            description: "Kingston DataTraveler".into(),
            removable: true,
        }
    }

    #[test]
    fn pager_windows_and_wraps() {
        let mut pager = Pager::new(95);
        assert_eq!(pager.window(), 0..40);
        assert_eq!(pager.handle("m"), Outcome::Advance);
        assert_eq!(pager.window(), 40..80);
        assert_eq!(pager.handle("m"), Outcome::Advance);
        assert_eq!(pager.window(), 80..95);
        assert_eq!(pager.handle("m"), Outcome::Advance);
        assert_eq!(pager.window(), 0..40);
    }

    #[test]
    fn pager_small_catalog_stays_on_one_page() {
        let mut pager = Pager::new(3);
        assert_eq!(pager.window(), 0..3);
        assert!(!pager.has_more());
        pager.handle("m");
        assert_eq!(pager.window(), 0..3);
    }

    #[test]
    fn pager_interprets_input() {
        let mut pager = Pager::new(5);
        assert_eq!(pager.handle(""), Outcome::Reshow);
        assert_eq!(pager.handle("?"), Outcome::Reshow);
        assert_eq!(pager.handle("0"), Outcome::Cancelled);
        assert_eq!(pager.handle("5"), Outcome::Selected(5));
        assert_eq!(pager.handle(" 2 "), Outcome::Selected(2));
        assert_eq!(pager.handle("6"), Outcome::OutOfRange);
        assert_eq!(pager.handle("abc"), Outcome::NotUnderstood);
        assert_eq!(pager.handle("-1"), Outcome::NotUnderstood);
        assert_eq!(pager.window(), 0..5);
    }

    #[test]
    fn first_run_selection_is_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut prompter = ScriptedPrompter::new(&["huh", "9", "2"]);

        let choice = select_image(&catalog(3), &store, &mut prompter).unwrap();
        assert_eq!(choice, Choice::Selected(2));
        assert_eq!(prompter.printed("didn't understand"), 1);
        assert_eq!(prompter.printed("9 is not one of the choices"), 1);
        assert_eq!(
            store.load_selection().unwrap(),
            SelectionState {
                has_run: true,
                last_index: 2
            }
        );
    }

    #[test]
    fn saved_choice_can_be_reused_without_a_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save_selection(SelectionState {
                has_run: true,
                last_index: 3,
            })
            .unwrap();
        let mut prompter = ScriptedPrompter::new(&[]);
        prompter.answers.push_back(true);

        let choice = select_image(&catalog(3), &store, &mut prompter).unwrap();
        assert_eq!(choice, Choice::Selected(3));
        assert_eq!(prompter.printed("Board 1"), 0);
    }

    #[test]
    fn declining_saved_choice_shows_the_page() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        store
            .save_selection(SelectionState {
                has_run: true,
                last_index: 3,
            })
            .unwrap();
        let mut prompter = ScriptedPrompter::new(&["?", "1"]);
        prompter.answers.push_back(false);

        let choice = select_image(&catalog(3), &store, &mut prompter).unwrap();
        assert_eq!(choice, Choice::Selected(1));
        assert_eq!(prompter.printed("Board 2"), 2);
        assert_eq!(store.load_selection().unwrap().last_index, 1);
    }

    #[test]
    fn quitting_the_image_prompt_saves_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut prompter = ScriptedPrompter::new(&["0"]);

        assert_eq!(
            select_image(&catalog(3), &store, &mut prompter).unwrap(),
            Choice::Quit
        );
        assert_eq!(store.load_selection().unwrap(), SelectionState::default());
    }

    #[test]
    fn paging_through_a_long_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let store = StateStore::new(dir.path());
        let mut prompter = ScriptedPrompter::new(&["m", "45"]);

        let choice = select_image(&catalog(45), &store, &mut prompter).unwrap();
        assert_eq!(choice, Choice::Selected(45));
        assert_eq!(prompter.printed("Board 41"), 1);
        assert_eq!(prompter.printed("m - more choices"), 2);
    }

    #[test]
    fn no_drive_found_keeps_the_prompt_live() {
        let source = Rescans(RefCell::new(VecDeque::from([
            Vec::new(),
            vec![usb("sdb"), usb("sdc")],
        ])));
        let mut prompter = ScriptedPrompter::new(&["", "2"]);

        let choice = select_drive(&source, 1, &mut prompter).unwrap();
        assert_eq!(choice, Choice::Selected(usb("sdc")));
        assert_eq!(prompter.printed("No removable drive found"), 1);
        assert_eq!(prompter.printed("at least 1 MB"), 2);
    }

    #[test]
    fn quitting_the_drive_prompt() {
        let source = Rescans(RefCell::new(VecDeque::from([vec![usb("sdb")]])));
        let mut prompter = ScriptedPrompter::new(&["3", "0"]);

        assert_eq!(select_drive(&source, 1, &mut prompter).unwrap(), Choice::Quit);
        assert_eq!(prompter.printed("3 is not one of the choices"), 1);
    }
}
