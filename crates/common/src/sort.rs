// Display ordering for directory children.
//
// Sorting is a pure function of the children and the policy; it never
// reflects filesystem state, so mirrors may resort at any time without
// asking the daemon.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

use crate::descriptor::Descriptor;

/// Per-directory ordering of non-directory children.
///
/// `TimeUp` lists the newest entry first and `TimeDown` the oldest first.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum SortKind {
    #[default]
    NameUp,
    NameDown,
    TimeUp,
    TimeDown,
}

impl SortKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NameUp => "name-up",
            Self::NameDown => "name-down",
            Self::TimeUp => "time-up",
            Self::TimeDown => "time-down",
        }
    }
}

impl fmt::Display for SortKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SortKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "name-up" => Ok(Self::NameUp),
            "name-down" => Ok(Self::NameDown),
            "time-up" => Ok(Self::TimeUp),
            "time-down" => Ok(Self::TimeDown),
            other => Err(format!("unknown sort kind `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Collation {
    /// Accent-insensitive, numeric-aware (`file2` before `file10`).
    #[default]
    Natural,
    /// Raw lower-cased lexicographic order.
    Ascii,
}

/// Which label a file is sorted by.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum DisplayName {
    #[default]
    Filename,
    Title,
    Heading,
    TitleAndHeading,
}

impl DisplayName {
    fn uses_title(self) -> bool {
        matches!(self, Self::Title | Self::TitleAndHeading)
    }

    fn uses_heading(self) -> bool {
        matches!(self, Self::Heading | Self::TitleAndHeading)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TimeField {
    #[default]
    Modification,
    Creation,
}

/// Display-layer sort configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SortPolicy {
    pub collation: Collation,
    pub folders_first: bool,
    pub display_name: DisplayName,
    /// BCP-47 locale tag. Collation currently applies root rules for every
    /// locale.
    pub locale: String,
    pub time_field: TimeField,
}

impl Default for SortPolicy {
    fn default() -> Self {
        Self {
            collation: Collation::Natural,
            folders_first: true,
            display_name: DisplayName::Filename,
            locale: "en".to_string(),
            time_field: TimeField::Modification,
        }
    }
}

impl SortPolicy {
    /// Order one directory's children.
    pub fn sort(&self, children: Vec<Descriptor>, kind: SortKind) -> Vec<Descriptor> {
        self.sort_by_descriptor(children, kind, |descriptor| descriptor)
    }

    /// Order arbitrary items that each expose a descriptor (e.g. arena ids).
    ///
    /// Directories are always ordered by name, ascending. Items whose keys
    /// compare equal keep their input order.
    pub fn sort_by_descriptor<T, F>(&self, items: Vec<T>, kind: SortKind, descriptor: F) -> Vec<T>
    where
        F: Fn(&T) -> &Descriptor,
    {
        let (dirs, files): (Vec<T>, Vec<T>) =
            items.into_iter().partition(|item| descriptor(item).is_directory());

        let mut dirs = self.by_name(dirs, false, &descriptor);
        let mut files = match kind {
            SortKind::NameUp => self.by_name(files, false, &descriptor),
            SortKind::NameDown => self.by_name(files, true, &descriptor),
            SortKind::TimeUp => self.by_time(files, true, &descriptor),
            SortKind::TimeDown => self.by_time(files, false, &descriptor),
        };

        if self.folders_first {
            dirs.append(&mut files);
            dirs
        } else {
            files.append(&mut dirs);
            files
        }
    }

    /// Recursively resort every directory in `tree` with its own sort kind.
    pub fn sort_tree(&self, tree: &mut Descriptor) {
        if let Descriptor::Directory(dir) = tree {
            for child in &mut dir.children {
                self.sort_tree(child);
            }
            let children = std::mem::take(&mut dir.children);
            dir.children = self.sort(children, dir.sort_kind);
        }
    }

    /// Label used for name ordering, lower-cased.
    pub fn name_key(&self, descriptor: &Descriptor) -> String {
        let title = if self.display_name.uses_title() { non_blank(descriptor.title()) } else { None };
        let heading =
            if self.display_name.uses_heading() { non_blank(descriptor.heading()) } else { None };
        title.or(heading).unwrap_or_else(|| descriptor.name()).to_lowercase()
    }

    pub fn compare_keys(&self, a: &str, b: &str) -> Ordering {
        match self.collation {
            Collation::Natural => natural_cmp(a, b),
            Collation::Ascii => a.cmp(b),
        }
    }

    fn time_of(&self, descriptor: &Descriptor) -> DateTime<Utc> {
        match self.time_field {
            TimeField::Modification => descriptor.modification_time(),
            TimeField::Creation => descriptor.creation_time(),
        }
    }

    fn by_name<T, F>(&self, items: Vec<T>, descending: bool, descriptor: &F) -> Vec<T>
    where
        F: Fn(&T) -> &Descriptor,
    {
        let mut keyed: Vec<(String, T)> =
            items.into_iter().map(|item| (self.name_key(descriptor(&item)), item)).collect();
        keyed.sort_by(|(a, _), (b, _)| {
            let ordering = self.compare_keys(a, b);
            if descending {
                ordering.reverse()
            } else {
                ordering
            }
        });
        keyed.into_iter().map(|(_, item)| item).collect()
    }

    fn by_time<T, F>(&self, items: Vec<T>, newest_first: bool, descriptor: &F) -> Vec<T>
    where
        F: Fn(&T) -> &Descriptor,
    {
        let mut keyed: Vec<(DateTime<Utc>, T)> =
            items.into_iter().map(|item| (self.time_of(descriptor(&item)), item)).collect();
        if newest_first {
            keyed.sort_by(|(a, _), (b, _)| b.cmp(a));
        } else {
            keyed.sort_by(|(a, _), (b, _)| a.cmp(b));
        }
        keyed.into_iter().map(|(_, item)| item).collect()
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.filter(|value| !value.trim().is_empty())
}

// ── Natural collation ──────────────────────────────────────────────

/// Accent-insensitive, numeric-aware comparison.
///
/// Ties on the folded form are broken by the unfolded form so that distinct
/// keys never compare equal.
pub fn natural_cmp(a: &str, b: &str) -> Ordering {
    let folded_a = fold(a);
    let folded_b = fold(b);
    compare_chunks(&folded_a, &folded_b).then_with(|| compare_chunks(a, b)).then_with(|| a.cmp(b))
}

fn fold(value: &str) -> String {
    value.nfkd().filter(|ch| !is_combining_mark(*ch)).collect()
}

#[derive(Debug, Clone, Copy)]
enum Chunk<'a> {
    Digits(&'a str),
    Text(&'a str),
}

struct Chunks<'a> {
    rest: &'a str,
}

impl<'a> Iterator for Chunks<'a> {
    type Item = Chunk<'a>;

    fn next(&mut self) -> Option<Chunk<'a>> {
        let first = self.rest.chars().next()?;
        let digits = first.is_ascii_digit();
        let end = self
            .rest
            .char_indices()
            .find(|(_, ch)| ch.is_ascii_digit() != digits)
            .map(|(index, _)| index)
            .unwrap_or(self.rest.len());
        let (head, tail) = self.rest.split_at(end);
        self.rest = tail;
        Some(if digits { Chunk::Digits(head) } else { Chunk::Text(head) })
    }
}

fn compare_chunks(a: &str, b: &str) -> Ordering {
    let mut left = Chunks { rest: a };
    let mut right = Chunks { rest: b };
    loop {
        let ordering = match (left.next(), right.next()) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(Chunk::Digits(x)), Some(Chunk::Digits(y))) => compare_numeric(x, y),
            (Some(Chunk::Digits(_)), Some(Chunk::Text(_))) => Ordering::Less,
            (Some(Chunk::Text(_)), Some(Chunk::Digits(_))) => Ordering::Greater,
            (Some(Chunk::Text(x)), Some(Chunk::Text(y))) => x.cmp(y),
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
}

fn compare_numeric(a: &str, b: &str) -> Ordering {
    let a = a.trim_start_matches('0');
    let b = b.trim_start_matches('0');
    a.len().cmp(&b.len()).then_with(|| a.cmp(b))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::descriptor::{DirectoryDescriptor, FileDescriptor};

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).single().expect("valid timestamp")
    }

    fn file(name: &str, modified: i64) -> Descriptor {
        FileDescriptor::new(format!("/root/{name}"), at(modified)).into()
    }

    fn dir(name: &str, modified: i64) -> Descriptor {
        DirectoryDescriptor::new(format!("/root/{name}"), at(modified)).into()
    }

    fn names(children: &[Descriptor]) -> Vec<&str> {
        children.iter().map(Descriptor::name).collect()
    }

    fn ascii() -> SortPolicy {
        SortPolicy { collation: Collation::Ascii, ..SortPolicy::default() }
    }

    #[test]
    fn name_up_with_ascii_collation_orders_alphabetically() {
        let sorted = ascii().sort(vec![file("b.md", 0), file("a.md", 0)], SortKind::NameUp);
        assert_eq!(names(&sorted), ["a.md", "b.md"]);
    }

    #[test]
    fn name_down_reverses_files_but_not_directories() {
        let children = vec![file("a.md", 0), dir("y", 0), file("c.md", 0), dir("x", 0)];
        let sorted = ascii().sort(children, SortKind::NameDown);
        assert_eq!(names(&sorted), ["x", "y", "c.md", "a.md"]);
    }

    #[test]
    fn time_up_is_newest_first_and_time_down_oldest_first() {
        let children = vec![file("old.md", 10), file("new.md", 30), file("mid.md", 20)];
        let up = ascii().sort(children.clone(), SortKind::TimeUp);
        assert_eq!(names(&up), ["new.md", "mid.md", "old.md"]);
        let down = ascii().sort(children, SortKind::TimeDown);
        assert_eq!(names(&down), ["old.md", "mid.md", "new.md"]);
    }

    #[test]
    fn directories_are_never_ordered_by_time() {
        let children = vec![dir("b", 99), dir("a", 1)];
        let sorted = ascii().sort(children, SortKind::TimeUp);
        assert_eq!(names(&sorted), ["a", "b"]);
    }

    #[test]
    fn creation_time_field_is_honoured() {
        let mut first = FileDescriptor::new("/root/first.md", at(50));
        first.creation_time = at(1);
        let mut second = FileDescriptor::new("/root/second.md", at(10));
        second.creation_time = at(2);
        let policy = SortPolicy { time_field: TimeField::Creation, ..ascii() };
        let sorted = policy.sort(vec![first.into(), second.into()], SortKind::TimeDown);
        assert_eq!(names(&sorted), ["first.md", "second.md"]);
    }

    #[test]
    fn folders_last_when_flag_is_off() {
        let policy = SortPolicy { folders_first: false, ..ascii() };
        let sorted = policy.sort(vec![dir("d", 0), file("f.md", 0)], SortKind::NameUp);
        assert_eq!(names(&sorted), ["f.md", "d"]);
    }

    #[test]
    fn equal_keys_keep_input_order() {
        let a = FileDescriptor::new("/root/one/same.md", at(5));
        let b = FileDescriptor::new("/root/two/same.md", at(5));
        for kind in [SortKind::NameUp, SortKind::NameDown, SortKind::TimeUp, SortKind::TimeDown] {
            let sorted = ascii().sort(vec![a.clone().into(), b.clone().into()], kind);
            assert_eq!(sorted[0].path(), "/root/one/same.md", "kind {kind}");
            assert_eq!(sorted[1].path(), "/root/two/same.md", "kind {kind}");
        }
    }

    #[test]
    fn title_then_heading_then_filename() {
        let titled = FileDescriptor::new("/root/z.md", at(0)).with_title("Alpha");
        let headed = FileDescriptor::new("/root/y.md", at(0)).with_heading("Beta");
        let plain = FileDescriptor::new("/root/gamma.md", at(0));
        let children: Vec<Descriptor> = vec![plain.into(), headed.into(), titled.into()];

        let by_title = SortPolicy { display_name: DisplayName::Title, ..ascii() };
        assert_eq!(names(&by_title.sort(children.clone(), SortKind::NameUp)), ["z.md", "gamma.md", "y.md"]);

        let by_both = SortPolicy { display_name: DisplayName::TitleAndHeading, ..ascii() };
        assert_eq!(names(&by_both.sort(children.clone(), SortKind::NameUp)), ["z.md", "y.md", "gamma.md"]);

        let by_name = ascii();
        assert_eq!(names(&by_name.sort(children, SortKind::NameUp)), ["gamma.md", "y.md", "z.md"]);
    }

    #[test]
    fn blank_title_falls_back() {
        let file = FileDescriptor::new("/root/Note.md", at(0)).with_title("  ");
        let policy = SortPolicy { display_name: DisplayName::Title, ..ascii() };
        assert_eq!(policy.name_key(&file.into()), "note.md");
    }

    #[test]
    fn natural_collation_is_numeric_aware() {
        let children = vec![file("file10.md", 0), file("file2.md", 0), file("file1.md", 0)];
        let natural = SortPolicy::default().sort(children.clone(), SortKind::NameUp);
        assert_eq!(names(&natural), ["file1.md", "file2.md", "file10.md"]);
        let raw = ascii().sort(children, SortKind::NameUp);
        assert_eq!(names(&raw), ["file1.md", "file10.md", "file2.md"]);
    }

    #[test]
    fn natural_collation_folds_accents() {
        assert_eq!(natural_cmp("école", "ezra"), Ordering::Less);
        assert_eq!(natural_cmp("ecole", "école"), Ordering::Less);
        assert_eq!(natural_cmp("a", "a"), Ordering::Equal);
        assert_eq!(natural_cmp("x02", "x2"), "x02".cmp("x2"));
    }

    #[test]
    fn sort_tree_uses_each_directory_sort_kind() {
        let inner = DirectoryDescriptor::new("/root/inner", at(0))
            .with_sort_kind(SortKind::TimeUp)
            .with_children(vec![file("old.md", 1), file("new.md", 2)]);
        let mut tree: Descriptor = DirectoryDescriptor::new("/root", at(0))
            .with_children(vec![file("b.md", 0), inner.into(), file("a.md", 0)])
            .into();

        ascii().sort_tree(&mut tree);

        assert_eq!(names(tree.children()), ["inner", "a.md", "b.md"]);
        assert_eq!(names(tree.children()[0].children()), ["new.md", "old.md"]);
    }

    #[test]
    fn sort_kind_parses_and_serializes_kebab_case() {
        assert_eq!("time-up".parse::<SortKind>().unwrap(), SortKind::TimeUp);
        assert!("sideways".parse::<SortKind>().is_err());
        assert_eq!(serde_json::to_value(SortKind::NameDown).unwrap(), "name-down");
    }
}
