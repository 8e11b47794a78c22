//! Fake IMAP server for integration testing.
#![allow(dead_code)] // each test binary uses a different subset of this module

mod io;

pub use mailbox::MailboxState;
pub use server::FakeImapServer;
