//! List and search output formatting
//!
//! Column-aligned rendering for `depot list`, `depot search` and `depot repos`.

use super::theme::{Theme, truncate};
use crossterm::style::Stylize;

fn header(columns: &str) {
    let theme = Theme::default();
    println!();
    println!("{}", columns.with(theme.colors.header));
}

/// Column headers for `depot list`
pub fn print_list_header() {
    let l = Theme::default().layout;
    header(&format!(
        "  {:<iw$} {:<vw$} {:<rw$} {:>5}   installed",
        "id",
        "version",
        "repository",
        "files",
        iw = l.id_width,
        vw = l.version_width,
        rw = l.repo_width,
    ));
}

/// One installed package
pub fn print_list_row(id: &str, version: &str, repository: &str, files: usize, date: &str) {
    let theme = Theme::default();
    let l = &theme.layout;
    println!(
        "  {} {} {} {:>5}   {}",
        format!("{id:<w$}", w = l.id_width).with(theme.colors.name),
        format!("{:<w$}", truncate(version, l.version_width), w = l.version_width)
            .with(theme.colors.version),
        format!("{:<w$}", truncate(repository, l.repo_width), w = l.repo_width)
            .with(theme.colors.secondary),
        files,
        date.with(theme.colors.secondary)
    );
}

/// Column headers for `depot search`
pub fn print_search_header() {
    let l = Theme::default().layout;
    header(&format!(
        "  {:<iw$} {:<nw$} {:<vw$} {:<rw$} match",
        "id",
        "name",
        "version",
        "repository",
        iw = l.id_width,
        nw = l.name_width,
        vw = l.version_width,
        rw = l.repo_width,
    ));
}

/// One search candidate
pub fn print_search_row(id: &str, name: &str, version: &str, repository: &str, score: &str) {
    let theme = Theme::default();
    let l = &theme.layout;
    println!(
        "  {} {} {} {} {}",
        format!("{id:<w$}", w = l.id_width).with(theme.colors.secondary),
        format!("{:<w$}", truncate(name, l.name_width), w = l.name_width).with(theme.colors.name),
        format!("{:<w$}", truncate(version, l.version_width), w = l.version_width)
            .with(theme.colors.version),
        format!("{:<w$}", truncate(repository, l.repo_width), w = l.repo_width)
            .with(theme.colors.secondary),
        score.with(theme.colors.secondary)
    );
}

/// Column headers for `depot repos`
pub fn print_repos_header() {
    let l = Theme::default().layout;
    header(&format!(
        "  {:<rw$} {:<nw$} {:<9} {:<7} mirrors",
        "key",
        "name",
        "policy",
        "trust",
        rw = l.repo_width,
        nw = l.name_width,
    ));
}

/// One configured repository
pub fn print_repos_row(key: &str, name: &str, policy: &str, trust: &str, mirrors: usize) {
    let theme = Theme::default();
    let l = &theme.layout;
    println!(
        "  {} {} {:<9} {:<7} {}",
        format!("{:<w$}", truncate(key, l.repo_width), w = l.repo_width).with(theme.colors.name),
        format!("{:<w$}", truncate(name, l.name_width), w = l.name_width).with(theme.colors.version),
        policy,
        trust,
        mirrors
    );
}

/// Footer line under a listing
pub fn print_footer(msg: &str) {
    let theme = Theme::default();
    println!();
    println!("  {}", msg.with(theme.colors.secondary));
}
