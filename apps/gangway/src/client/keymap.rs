//! Platform-independent key symbols and the canned key-combination catalog.
//!
//! Remote key instructions are keyed by X11 keysyms: printable Latin-1
//! characters map to their own code points, everything else to the 0xFF00
//! function-key page, and other Unicode scalars to the 0x0100_0000 offset
//! range.

pub type Keysym = u32;

pub mod keysyms {
    use super::Keysym;

    pub const BACKSPACE: Keysym = 0xff08;
    pub const TAB: Keysym = 0xff09;
    pub const RETURN: Keysym = 0xff0d;
    pub const ESCAPE: Keysym = 0xff1b;
    pub const HOME: Keysym = 0xff50;
    pub const LEFT: Keysym = 0xff51;
    pub const UP: Keysym = 0xff52;
    pub const RIGHT: Keysym = 0xff53;
    pub const DOWN: Keysym = 0xff54;
    pub const PAGE_UP: Keysym = 0xff55;
    pub const PAGE_DOWN: Keysym = 0xff56;
    pub const END: Keysym = 0xff57;
    pub const INSERT: Keysym = 0xff63;
    pub const DELETE: Keysym = 0xffff;
    pub const F1: Keysym = 0xffbe;
    pub const SHIFT_L: Keysym = 0xffe1;
    pub const CONTROL_L: Keysym = 0xffe3;
    pub const ALT_L: Keysym = 0xffe9;
    pub const SUPER_L: Keysym = 0xffeb;
}

/// Key identity as reported by the hosting environment, before translation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostKey {
    Char(char),
    Enter,
    Backspace,
    Tab,
    Escape,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
    Insert,
    Delete,
    F(u8),
    Shift,
    Control,
    Alt,
    Super,
}

/// A translated key plus whether the embedder must suppress the host's
/// default handling for it. Backspace is flagged so it can never trigger
/// host-level navigation while a session owns the input sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyDispatch {
    pub keysym: Keysym,
    pub suppress_host: bool,
}

pub fn translate(key: HostKey) -> KeyDispatch {
    let keysym = match key {
        HostKey::Char(ch) => unicode_keysym(ch),
        HostKey::Enter => keysyms::RETURN,
        HostKey::Backspace => keysyms::BACKSPACE,
        HostKey::Tab => keysyms::TAB,
        HostKey::Escape => keysyms::ESCAPE,
        HostKey::Left => keysyms::LEFT,
        HostKey::Right => keysyms::RIGHT,
        HostKey::Up => keysyms::UP,
        HostKey::Down => keysyms::DOWN,
        HostKey::Home => keysyms::HOME,
        HostKey::End => keysyms::END,
        HostKey::PageUp => keysyms::PAGE_UP,
        HostKey::PageDown => keysyms::PAGE_DOWN,
        HostKey::Insert => keysyms::INSERT,
        HostKey::Delete => keysyms::DELETE,
        HostKey::F(n) => keysyms::F1 + Keysym::from(n.saturating_sub(1)),
        HostKey::Shift => keysyms::SHIFT_L,
        HostKey::Control => keysyms::CONTROL_L,
        HostKey::Alt => keysyms::ALT_L,
        HostKey::Super => keysyms::SUPER_L,
    };
    KeyDispatch {
        keysym,
        suppress_host: matches!(key, HostKey::Backspace),
    }
}

pub fn unicode_keysym(ch: char) -> Keysym {
    let code = ch as u32;
    if (0x20..=0x7e).contains(&code) || (0xa0..=0xff).contains(&code) {
        code
    } else {
        0x0100_0000 + code
    }
}

/// A canned multi-key shortcut. Dispatch order is strict: every key-down in
/// listed order, then every key-up in listed order, so modifier semantics
/// survive on the remote end.
#[derive(Debug, Clone, Copy)]
pub struct Combination {
    pub name: &'static str,
    pub label: &'static str,
    pub keys: &'static [Keysym],
}

pub const COMBINATIONS: &[Combination] = &[
    Combination {
        name: "ctrl-alt-delete",
        label: "Ctrl+Alt+Delete",
        keys: &[keysyms::CONTROL_L, keysyms::ALT_L, keysyms::DELETE],
    },
    Combination {
        name: "ctrl-c",
        label: "Ctrl+C",
        keys: &[keysyms::CONTROL_L, 0x0063],
    },
    Combination {
        name: "alt-tab",
        label: "Alt+Tab",
        keys: &[keysyms::ALT_L, keysyms::TAB],
    },
    Combination {
        name: "ctrl-esc",
        label: "Ctrl+Esc",
        keys: &[keysyms::CONTROL_L, keysyms::ESCAPE],
    },
    Combination {
        name: "super",
        label: "Super",
        keys: &[keysyms::SUPER_L],
    },
    Combination {
        name: "super-d",
        label: "Super+D",
        keys: &[keysyms::SUPER_L, 0x0064],
    },
];

pub fn combination(name: &str) -> Option<&'static Combination> {
    COMBINATIONS.iter().find(|combo| combo.name == name)
}
