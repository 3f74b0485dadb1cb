use std::io::{self, Write};

use serde::Serialize;

use crate::app::{AddBookResult, ListResult, ShelfNamesResult};
use crate::domain::ShelfEntry;
use crate::users::RegisteredUser;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_add(result: &AddBookResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_list(result: &ListResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_shelf_names(result: &ShelfNamesResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_entry(entry: &ShelfEntry) -> io::Result<()> {
        Self::print_json(entry)
    }

    pub fn print_user(user: &RegisteredUser) -> io::Result<()> {
        Self::print_json(user)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout().lock();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}
