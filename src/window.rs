
use std::fmt;

use serde::{Deserialize, Serialize};


pub type Hwnd = isize;



/// One enumerated window as reported by the OS side, before the engine tracks it.
/// A failed pid lookup is reported as pid 0, a failed title read as an empty title.
# [ derive (Debug, Default, Eq, PartialEq, Hash, Clone, Serialize, Deserialize) ]
pub struct RawWindow {
    pub hwnd  : Hwnd,
    pub pid   : u32,
    pub title : String,
}

impl RawWindow {
    pub fn new (hwnd:Hwnd, pid:u32, title:&str) -> RawWindow {
        RawWindow { hwnd, pid, title: title.to_string() }
    }
}


/// A window the engine is tracking
# [ derive (Debug, Default, Eq, PartialEq, Clone, Serialize, Deserialize) ]
pub struct ManagedWindow {
    pub hwnd         : Hwnd,
    pub pid          : u32,
    pub title        : String,
    pub cached_title : String,
    pub order        : usize,
}

impl ManagedWindow {
    pub fn from_raw (rw:&RawWindow) -> ManagedWindow {
        ManagedWindow {
            hwnd         : rw.hwnd,
            pid          : rw.pid,
            title        : rw.title.clone(),
            cached_title : rw.title.clone(),
            order        : 0,
        }
    }
    /// Takes in the latest observed title, returns whether that was a rename
    pub fn observe_title (&mut self, live_title:&str) -> bool {
        let renamed = self.cached_title != live_title;
        self.title = live_title.to_string();
        self.cached_title = live_title.to_string();
        renamed
    }
}



/// The OS-side collaborator the engine polls and drives.
pub trait WindowSource : Send + Sync + 'static {
    /// Visible windows whose owning process image name matches `process_filter`, in no particular order
    fn list_windows (&self, process_filter:&str) -> Vec<RawWindow>;

    /// Live title of a window, None if it could not be read
    fn window_title (&self, hwnd:Hwnd) -> Option<String>;

    /// Raises the window to the foreground, returns whether the OS accepted it
    fn bring_to_front (&self, hwnd:Hwnd) -> bool;
}



/// OS notifications about windows, used to run a reconciliation pass early
# [ derive (Debug, Eq, PartialEq, Hash, Copy, Clone) ]
pub enum WindowEvent {
    Shown        (Hwnd),
    Hidden       (Hwnd),
    Destroyed    (Hwnd),
    TitleChanged (Hwnd),
}



/// Rules for turning a window title into a durable label
# [ derive (Debug, Eq, PartialEq, Clone) ]
pub struct LabelRules {
    pub delimiter : String,
    pub marker    : String,
}

impl Default for LabelRules {
    fn default () -> Self {
        LabelRules { delimiter: " - ".to_string(), marker: "Dofus".to_string() }
    }
}


# [ derive (Debug, Eq, PartialEq, Hash, Clone, PartialOrd, Ord) ]
pub enum WindowLabel {
    Named (String),
    Placeholder,
}

impl WindowLabel {
    pub const PLACEHOLDER_STR : &'static str = "...";

    pub fn derive (title:&str, rules:&LabelRules) -> WindowLabel {
        // a title without the delimiter is a client that hasnt picked a character yet
        let Some ((head, _)) = title.split_once (rules.delimiter.as_str()) else { return WindowLabel::Placeholder };
        if head.is_empty() { return WindowLabel::Placeholder }
        if !rules.marker.is_empty() && head.contains (rules.marker.as_str()) { return WindowLabel::Placeholder }
        WindowLabel::Named (head.to_string())
    }

    pub fn name (&self) -> Option<&str> {
        match self { WindowLabel::Named(s) => Some(s.as_str()), WindowLabel::Placeholder => None }
    }
}

impl fmt::Display for WindowLabel {
    fn fmt (&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WindowLabel::Named(s)    => f.write_str(s),
            WindowLabel::Placeholder => f.write_str(Self::PLACEHOLDER_STR),
        }
    }
}



/// Order-independent identity of a window set: its sorted non-placeholder labels
# [ derive (Debug, Default, Eq, PartialEq, Hash, Clone) ]
pub struct Fingerprint (Vec<String>);

impl Fingerprint {
    pub fn from_labels <'a, I> (labels:I) -> Fingerprint where I: IntoIterator<Item = &'a WindowLabel> {
        Self::from_names ( labels .into_iter() .filter_map (|l| l.name()) )
    }
    pub fn from_names <S, I> (names:I) -> Fingerprint where S: AsRef<str>, I: IntoIterator<Item = S> {
        let mut v = names .into_iter() .map (|s| s.as_ref().to_string()) .collect::<Vec<_>>();
        v.sort();
        Fingerprint (v)
    }
    pub fn is_empty (&self) -> bool { self.0.is_empty() }
    pub fn names (&self) -> &[String] { &self.0 }
}




#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn named (s:&str) -> WindowLabel { WindowLabel::Named (s.to_string()) }

    #[test]
    fn label_is_title_head_before_delimiter() {
        let rules = LabelRules::default();
        assert_eq!(WindowLabel::derive ("Iop-Blade - Iop - 2.71.4.2 - Release", &rules), named("Iop-Blade"));
    }

    #[test]
    fn titles_without_delimiter_or_with_marker_are_placeholders() {
        let rules = LabelRules::default();
        assert_eq!(WindowLabel::derive ("Dofus", &rules), WindowLabel::Placeholder);
        assert_eq!(WindowLabel::derive ("Dofus 2.71 - Release", &rules), WindowLabel::Placeholder);
        assert_eq!(WindowLabel::derive ("", &rules), WindowLabel::Placeholder);
        assert_eq!(WindowLabel::Placeholder.to_string(), "...");
    }

    #[test]
    fn custom_rules_apply() {
        let rules = LabelRules { delimiter: " | ".into(), marker: String::new() };
        assert_eq!(WindowLabel::derive ("Alpha | x", &rules), named("Alpha"));
        assert_eq!(WindowLabel::derive ("Alpha - x", &rules), WindowLabel::Placeholder);
    }

    #[test]
    fn fingerprint_ignores_order_and_placeholders() {
        let a = [named("b"), WindowLabel::Placeholder, named("a"), named("c")];
        let b = [named("c"), named("a"), named("b")];
        assert_eq!(Fingerprint::from_labels(&a), Fingerprint::from_labels(&b));
        assert_eq!(Fingerprint::from_labels(&a).names(), &["a", "b", "c"]);
        assert!(Fingerprint::from_labels(&[WindowLabel::Placeholder]).is_empty());
    }

    #[test]
    fn observing_a_new_title_reports_rename() {
        let mut w = ManagedWindow::from_raw (&RawWindow::new (7, 1, "a - x"));
        assert!(!w.observe_title ("a - x"));
        assert!(w.observe_title ("b - x"));
        assert_eq!(w.cached_title, "b - x");
    }
}
