//! Parser for `LIST` output in the Unix `ls -l` and DOS/IIS styles.

use chrono::{Datelike, NaiveDate, NaiveDateTime, Utc};
use filebridge_base::{Access, Class};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Symlink,
}

/// One line of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FtpEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<NaiveDateTime>,
    pub link_target: Option<String>,
    /// Indexed by class, then access.
    permissions: [[bool; 3]; 3],
}

impl FtpEntry {
    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }

    pub fn has_permission(&self, class: Class, access: Access) -> bool {
        let class = match class {
            Class::Owner => 0,
            Class::Group => 1,
            Class::Others => 2,
        };
        let access = match access {
            Access::Read => 0,
            Access::Write => 1,
            Access::Execute => 2,
        };
        self.permissions[class][access]
    }
}

const MONTHS: [&str; 12] = [
    "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
];

/// Parse one listing line. Headers such as `total 12` yield `None`.
pub fn parse_line(line: &str) -> Option<FtpEntry> {
    parse_line_at(line, Utc::now().date_naive())
}

/// Parse with an explicit current date, which resolves the year of
/// recent Unix entries (`Mon DD HH:MM`).
pub fn parse_line_at(line: &str, today: NaiveDate) -> Option<FtpEntry> {
    let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
    if line.starts_with(|c: char| c.is_ascii_digit()) {
        parse_dos(line)
    } else {
        parse_unix(line, today)
    }
}

/// Whitespace-separated tokens with their byte offsets.
fn tokens(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        if c.is_whitespace() {
            if let Some(s) = start.take() {
                out.push((s, &line[s..i]));
            }
        } else if start.is_none() {
            start = Some(i);
        }
    }
    if let Some(s) = start {
        out.push((s, &line[s..]));
    }
    out
}

fn parse_unix(line: &str, today: NaiveDate) -> Option<FtpEntry> {
    let tokens = tokens(line);
    let mode = tokens.first()?.1.as_bytes();
    if mode.len() < 10 {
        return None;
    }
    let kind = match mode[0] {
        b'd' => EntryKind::Directory,
        b'l' => EntryKind::Symlink,
        b'-' | b'b' | b'c' | b'p' | b's' => EntryKind::File,
        _ => return None,
    };
    let permissions = parse_permissions(&mode[1..10])?;

    // Owner and group columns are optional on some servers, so anchor on
    // "<size> <month> <day> <time|year> <name>".
    let month_at = (2..tokens.len().saturating_sub(3))
        .find(|&i| month(tokens[i].1).is_some() && tokens[i - 1].1.parse::<u64>().is_ok())?;
    let size = tokens[month_at - 1].1.parse().ok()?;
    let modified = parse_unix_date(
        tokens[month_at].1,
        tokens[month_at + 1].1,
        tokens[month_at + 2].1,
        today,
    );

    let mut name = &line[tokens[month_at + 3].0..];
    let mut link_target = None;
    if kind == EntryKind::Symlink {
        if let Some((link, target)) = name.split_once(" -> ") {
            name = link;
            link_target = Some(target.to_string());
        }
    }

    Some(FtpEntry {
        name: name.to_string(),
        kind,
        size,
        modified,
        link_target,
        permissions,
    })
}

fn parse_permissions(bits: &[u8]) -> Option<[[bool; 3]; 3]> {
    let mut permissions = [[false; 3]; 3];
    for (class, chunk) in bits.chunks(3).enumerate() {
        permissions[class][0] = match chunk[0] {
            b'r' => true,
            b'-' => false,
            _ => return None,
        };
        permissions[class][1] = match chunk[1] {
            b'w' => true,
            b'-' => false,
            _ => return None,
        };
        permissions[class][2] = match chunk[2] {
            b'x' | b's' | b't' => true,
            b'-' | b'S' | b'T' => false,
            _ => return None,
        };
    }
    Some(permissions)
}

fn month(token: &str) -> Option<u32> {
    let lower = token.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower)
        .map(|i| i as u32 + 1)
}

fn parse_unix_date(month_token: &str, day: &str, time_or_year: &str, today: NaiveDate) -> Option<NaiveDateTime> {
    let month = month(month_token)?;
    let day: u32 = day.parse().ok()?;

    match time_or_year.split_once(':') {
        Some((hour, minute)) => {
            let (hour, minute) = (hour.parse().ok()?, minute.parse().ok()?);
            // No year means within the last six months; a date ahead of
            // today (allowing for time zones) belongs to last year.
            // A Feb 29 that does not exist this year is also last year's.
            let tomorrow = today.succ_opt().unwrap_or(today);
            let date = match NaiveDate::from_ymd_opt(today.year(), month, day) {
                Some(date) if date <= tomorrow => date,
                _ => NaiveDate::from_ymd_opt(today.year() - 1, month, day)?,
            };
            date.and_hms_opt(hour, minute, 0)
        }
        None => {
            let year = time_or_year.parse().ok()?;
            NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(0, 0, 0)
        }
    }
}

/// `01-15-24  10:30AM       <DIR>          name` or `... 1,234 name`.
fn parse_dos(line: &str) -> Option<FtpEntry> {
    let tokens = tokens(line);
    if tokens.len() < 4 {
        return None;
    }
    let modified = Some(parse_dos_date(tokens[0].1, tokens[1].1)?);
    let (kind, size) = if tokens[2].1.eq_ignore_ascii_case("<DIR>") {
        (EntryKind::Directory, 0)
    } else {
        (EntryKind::File, tokens[2].1.replace(',', "").parse().ok()?)
    };

    // DOS listings carry no mode column.
    Some(FtpEntry {
        name: line[tokens[3].0..].to_string(),
        kind,
        size,
        modified,
        link_target: None,
        permissions: [[false; 3]; 3],
    })
}

fn parse_dos_date(date: &str, time: &str) -> Option<NaiveDateTime> {
    let mut parts = date.split('-');
    let month = parts.next()?.parse().ok()?;
    let day = parts.next()?.parse().ok()?;
    let year: i32 = parts.next()?.parse().ok()?;
    let year = match year {
        0..=69 => 2000 + year,
        70..=99 => 1900 + year,
        _ => year,
    };

    let upper = time.to_ascii_uppercase();
    let (clock, meridiem) = match upper.strip_suffix("AM") {
        Some(clock) => (clock, Some(false)),
        None => match upper.strip_suffix("PM") {
            Some(clock) => (clock, Some(true)),
            None => (upper.as_str(), None),
        },
    };
    let (hour, minute) = clock.split_once(':')?;
    let mut hour: u32 = hour.parse().ok()?;
    let minute = minute.parse().ok()?;
    match meridiem {
        Some(true) if hour < 12 => hour += 12,
        Some(false) if hour == 12 => hour = 0,
        _ => {}
    }

    NaiveDate::from_ymd_opt(year, month, day)?.and_hms_opt(hour, minute, 0)
}
