//! Lifecycle states of a book.
//!
//! A [`BookState`] is an immutable value describing what is true about a book
//! right now. Every transition takes the current state by reference and
//! returns the successor (or an [`DomainError::InvalidTransition`]); the
//! current value is never modified in place. Only [`crate::Book`] holds a
//! state and swaps it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use lending_core::{DomainError, DomainResult, LibraryBranchId, PatronId, ValueObject};

/// Name of a lifecycle state, for display and for external serialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StateName {
    Available,
    OnHold,
    CheckedOut,
}

impl StateName {
    pub fn as_str(self) -> &'static str {
        match self {
            StateName::Available => "AVAILABLE",
            StateName::OnHold => "ON_HOLD",
            StateName::CheckedOut => "CHECKED_OUT",
        }
    }
}

impl core::fmt::Display for StateName {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Current lifecycle state of a book.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookState {
    /// On the shelf at `branch`, nobody attached.
    Available { branch: LibraryBranchId },
    /// Reserved for `patron` at `branch` until `hold_till`, not yet picked up.
    OnHold {
        branch: LibraryBranchId,
        patron: PatronId,
        hold_till: DateTime<Utc>,
    },
    /// Lent to `patron`, checked out at `branch`.
    CheckedOut {
        branch: LibraryBranchId,
        patron: PatronId,
    },
}

impl ValueObject for BookState {}

impl BookState {
    pub fn available(branch: LibraryBranchId) -> Self {
        BookState::Available { branch }
    }

    pub fn name(&self) -> StateName {
        match self {
            BookState::Available { .. } => StateName::Available,
            BookState::OnHold { .. } => StateName::OnHold,
            BookState::CheckedOut { .. } => StateName::CheckedOut,
        }
    }

    /// Branch the book is at (available), was held at, or was checked out at.
    pub fn branch(&self) -> LibraryBranchId {
        match self {
            BookState::Available { branch }
            | BookState::OnHold { branch, .. }
            | BookState::CheckedOut { branch, .. } => *branch,
        }
    }

    /// Patron holding or borrowing the book; `None` while available.
    pub fn patron(&self) -> Option<PatronId> {
        match self {
            BookState::Available { .. } => None,
            BookState::OnHold { patron, .. } | BookState::CheckedOut { patron, .. } => {
                Some(*patron)
            }
        }
    }

    /// Hold deadline, only present while on hold.
    pub fn hold_till(&self) -> Option<DateTime<Utc>> {
        match self {
            BookState::OnHold { hold_till, .. } => Some(*hold_till),
            BookState::Available { .. } | BookState::CheckedOut { .. } => None,
        }
    }

    // ---- predicates -------------------------------------------------------

    /// Any patron may borrow an available book; a held book only by its holder.
    pub fn can_be_checked_out(&self, by: PatronId) -> bool {
        match self {
            BookState::Available { .. } => true,
            BookState::OnHold { patron, .. } => *patron == by,
            BookState::CheckedOut { .. } => false,
        }
    }

    pub fn can_be_put_on_hold(&self, _by: PatronId) -> bool {
        matches!(self, BookState::Available { .. })
    }

    pub fn can_be_returned(&self) -> bool {
        matches!(self, BookState::CheckedOut { .. })
    }

    // ---- transitions ------------------------------------------------------

    pub fn place_on_hold(
        &self,
        patron: PatronId,
        branch: LibraryBranchId,
        hold_till: DateTime<Utc>,
    ) -> DomainResult<BookState> {
        match self {
            BookState::Available { .. } => Ok(BookState::OnHold {
                branch,
                patron,
                hold_till,
            }),
            BookState::OnHold { .. } => Err(DomainError::invalid_transition(
                "Book is already on hold",
            )),
            BookState::CheckedOut { .. } => Err(DomainError::invalid_transition(
                "Cannot place a hold on a checked out book",
            )),
        }
    }

    pub fn checkout(&self, patron: PatronId, branch: LibraryBranchId) -> DomainResult<BookState> {
        match self {
            BookState::Available { .. } => Ok(BookState::CheckedOut { branch, patron }),
            BookState::OnHold { patron: holder, .. } if *holder == patron => {
                Ok(BookState::CheckedOut { branch, patron })
            }
            BookState::OnHold { .. } => Err(DomainError::invalid_transition(
                "Only the patron who placed the hold can check out the book",
            )),
            BookState::CheckedOut { .. } => Err(DomainError::invalid_transition(
                "Book is already checked out",
            )),
        }
    }

    /// The book becomes available at the branch it was returned to, which
    /// may differ from the one it was checked out at.
    pub fn return_book(&self, branch: LibraryBranchId) -> DomainResult<BookState> {
        match self {
            BookState::CheckedOut { .. } => Ok(BookState::Available { branch }),
            BookState::Available { .. } => Err(DomainError::invalid_transition(
                "Cannot return an available book",
            )),
            BookState::OnHold { .. } => Err(DomainError::invalid_transition(
                "Cannot return a book that is on hold",
            )),
        }
    }

    pub fn cancel_hold(&self) -> DomainResult<BookState> {
        match self {
            BookState::OnHold { branch, .. } => Ok(BookState::Available { branch: *branch }),
            BookState::Available { .. } => Err(DomainError::invalid_transition(
                "Cannot cancel hold on an available book",
            )),
            BookState::CheckedOut { .. } => Err(DomainError::invalid_transition(
                "Cannot cancel hold on a checked out book",
            )),
        }
    }

    /// Release the hold if `now` has reached the deadline.
    ///
    /// Before the deadline the same hold is returned unchanged, so repeated
    /// calls are harmless.
    pub fn expire_hold(&self, now: DateTime<Utc>) -> DomainResult<BookState> {
        match self {
            BookState::OnHold {
                branch, hold_till, ..
            } => {
                if now >= *hold_till {
                    Ok(BookState::Available { branch: *branch })
                } else {
                    Ok(self.clone())
                }
            }
            BookState::Available { .. } => Err(DomainError::invalid_transition(
                "Cannot expire hold on an available book",
            )),
            BookState::CheckedOut { .. } => Err(DomainError::invalid_transition(
                "Cannot expire hold on a checked out book",
            )),
        }
    }
}
