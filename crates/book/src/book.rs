use chrono::{DateTime, Utc};
use tracing::debug;

use lending_core::{AggregateRoot, BookId, BookType, DomainResult, LibraryBranchId, PatronId};

use crate::state::{BookState, StateName};

/// Aggregate root: Book.
///
/// The book is the only mutable piece of the lifecycle. It holds exactly one
/// [`BookState`] and a version that grows by one for every committed
/// transition.
///
/// Two legality policies apply:
/// - `place_on_hold`, `checkout` and `return_book` are **guarded**: the
///   current state's predicate is consulted first and a refusal is a silent
///   no-op (the methods return `false`, nothing changes).
/// - `cancel_hold` and `expire_hold` are **unguarded**: the transition is
///   attempted directly and an illegal source state is reported as
///   [`lending_core::DomainError::InvalidTransition`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    id: BookId,
    book_type: BookType,
    state: BookState,
    version: u64,
}

impl Book {
    /// A new book, available at `branch`, starting at `version`.
    pub fn new(id: BookId, book_type: BookType, branch: LibraryBranchId, version: u64) -> Self {
        Self {
            id,
            book_type,
            state: BookState::available(branch),
            version,
        }
    }

    pub fn book_id(&self) -> BookId {
        self.id
    }

    pub fn book_type(&self) -> BookType {
        self.book_type
    }

    pub fn state(&self) -> &BookState {
        &self.state
    }

    pub fn current_state(&self) -> StateName {
        self.state.name()
    }

    pub fn current_branch(&self) -> LibraryBranchId {
        self.state.branch()
    }

    pub fn current_patron(&self) -> Option<PatronId> {
        self.state.patron()
    }

    /// Reserve the book for `patron`. Returns whether the hold was placed.
    pub fn place_on_hold(
        &mut self,
        patron: PatronId,
        branch: LibraryBranchId,
        hold_till: DateTime<Utc>,
    ) -> bool {
        if !self.state.can_be_put_on_hold(patron) {
            self.refused("place_on_hold");
            return false;
        }
        let next = self.state.place_on_hold(patron, branch, hold_till);
        self.commit_guarded("place_on_hold", next)
    }

    /// Lend the book to `patron`. Returns whether the checkout happened.
    pub fn checkout(&mut self, patron: PatronId, branch: LibraryBranchId) -> bool {
        if !self.state.can_be_checked_out(patron) {
            self.refused("checkout");
            return false;
        }
        let next = self.state.checkout(patron, branch);
        self.commit_guarded("checkout", next)
    }

    /// Take the book back at `branch`. Returns whether the return happened.
    pub fn return_book(&mut self, branch: LibraryBranchId) -> bool {
        if !self.state.can_be_returned() {
            self.refused("return_book");
            return false;
        }
        let next = self.state.return_book(branch);
        self.commit_guarded("return_book", next)
    }

    pub fn cancel_hold(&mut self) -> DomainResult<()> {
        let next = self.state.cancel_hold()?;
        self.commit("cancel_hold", next);
        Ok(())
    }

    /// Evaluate the hold against `now`.
    ///
    /// The version is bumped even when the hold has not expired yet and the
    /// state stays the same.
    pub fn expire_hold(&mut self, now: DateTime<Utc>) -> DomainResult<()> {
        let next = self.state.expire_hold(now)?;
        self.commit("expire_hold", next);
        Ok(())
    }

    fn commit_guarded(&mut self, operation: &'static str, next: DomainResult<BookState>) -> bool {
        match next {
            Ok(next) => {
                self.commit(operation, next);
                true
            }
            // Predicates and transitions agree, but a refusal here must stay silent too.
            Err(err) => {
                debug!(book_id = %self.id, operation, error = %err, "guarded transition rejected");
                false
            }
        }
    }

    fn commit(&mut self, operation: &'static str, next: BookState) {
        let from = self.state.name();
        self.state = next;
        self.version += 1;

        debug!(
            book_id = %self.id,
            operation,
            from = %from,
            to = %self.state.name(),
            version = self.version,
            "book state transition committed"
        );
    }

    fn refused(&self, operation: &'static str) {
        debug!(
            book_id = %self.id,
            operation,
            state = %self.state.name(),
            "guarded operation refused"
        );
    }
}

impl AggregateRoot for Book {
    type Id = BookId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use lending_core::{DomainError, ExpectedVersion};
    use proptest::prelude::*;

    fn test_branch() -> LibraryBranchId {
        LibraryBranchId::new()
    }

    fn test_patron() -> PatronId {
        PatronId::new()
    }

    fn test_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap()
    }

    fn test_book(branch: LibraryBranchId) -> Book {
        Book::new(BookId::new(), BookType::Circulating, branch, 0)
    }

    #[test]
    fn new_book_is_available_at_its_branch() {
        let id = BookId::new();
        let branch = test_branch();
        let book = Book::new(id, BookType::Restricted, branch, 7);

        assert_eq!(book.book_id(), id);
        assert_eq!(*book.id(), id);
        assert_eq!(book.book_type(), BookType::Restricted);
        assert_eq!(book.current_state(), StateName::Available);
        assert_eq!(book.current_branch(), branch);
        assert_eq!(book.current_patron(), None);
        assert_eq!(book.version(), 7);
    }

    #[test]
    fn checkout_of_available_book_bumps_version() {
        let branch = test_branch();
        let patron = test_patron();
        let mut book = test_book(branch);

        assert!(book.checkout(patron, branch));
        assert_eq!(book.state(), &BookState::CheckedOut { branch, patron });
        assert_eq!(book.version(), 1);
    }

    #[test]
    fn refused_guarded_operations_are_silent_no_ops() {
        let branch = test_branch();
        let patron = test_patron();
        let mut book = test_book(branch);
        book.checkout(patron, branch);
        let before = book.clone();

        assert!(!book.checkout(test_patron(), branch));
        assert!(!book.place_on_hold(test_patron(), branch, test_time()));
        assert_eq!(book, before);

        let mut available = test_book(branch);
        assert!(!available.return_book(test_branch()));
        assert_eq!(available.version(), 0);
        assert_eq!(available.current_state(), StateName::Available);
    }

    #[test]
    fn held_book_can_only_be_checked_out_by_holder() {
        let branch = test_branch();
        let holder = test_patron();
        let mut book = test_book(branch);
        book.place_on_hold(holder, branch, test_time() + Duration::hours(1));

        assert!(!book.checkout(test_patron(), branch));
        assert_eq!(book.current_patron(), Some(holder));
        assert_eq!(book.version(), 1);

        assert!(book.checkout(holder, branch));
        assert_eq!(book.current_state(), StateName::CheckedOut);
        assert_eq!(book.version(), 2);
    }

    #[test]
    fn cancel_hold_outside_hold_fails_and_changes_nothing() {
        let branch = test_branch();
        let mut book = test_book(branch);

        let err = book.cancel_hold().unwrap_err();
        assert_eq!(
            err,
            DomainError::invalid_transition("Cannot cancel hold on an available book")
        );
        assert_eq!(book.version(), 0);

        book.checkout(test_patron(), branch);
        let before = book.clone();
        match book.cancel_hold() {
            Err(DomainError::InvalidTransition(_)) => {}
            other => panic!("Expected InvalidTransition, got {other:?}"),
        }
        assert_eq!(book, before);
    }

    #[test]
    fn cancel_hold_releases_at_hold_branch() {
        let home = test_branch();
        let hold_branch = test_branch();
        let mut book = test_book(home);
        book.place_on_hold(test_patron(), hold_branch, test_time());

        book.cancel_hold().unwrap();
        assert_eq!(book.state(), &BookState::available(hold_branch));
        assert_eq!(book.current_patron(), None);
        assert_eq!(book.version(), 2);
    }

    #[test]
    fn expire_hold_before_deadline_still_bumps_version() {
        let branch = test_branch();
        let patron = test_patron();
        let deadline = test_time() + Duration::hours(1);
        let mut book = test_book(branch);
        book.place_on_hold(patron, branch, deadline);
        let held = book.state().clone();

        book.expire_hold(test_time()).unwrap();
        book.expire_hold(test_time() + Duration::minutes(59)).unwrap();

        assert_eq!(book.state(), &held);
        assert_eq!(book.version(), 3);
    }

    #[test]
    fn expire_hold_on_checked_out_book_propagates_error() {
        let branch = test_branch();
        let mut book = test_book(branch);
        book.checkout(test_patron(), branch);

        let err = book.expire_hold(test_time()).unwrap_err();
        assert_eq!(
            err.transition_reason(),
            Some("Cannot expire hold on a checked out book")
        );
        assert_eq!(book.version(), 1);
        assert_eq!(book.current_state(), StateName::CheckedOut);
    }

    #[test]
    fn returned_book_forgets_previous_borrower() {
        let branch = test_branch();
        let first = test_patron();
        let second = test_patron();
        let mut book = test_book(branch);

        book.checkout(first, branch);
        book.return_book(branch);
        assert!(book.checkout(second, branch));

        assert_eq!(
            book.state(),
            &BookState::CheckedOut {
                branch,
                patron: second
            }
        );
        assert_eq!(book.version(), 3);
    }

    #[test]
    fn version_feeds_optimistic_concurrency_check() {
        let branch = test_branch();
        let mut book = test_book(branch);
        let loaded_at = ExpectedVersion::Exact(book.version());

        book.checkout(test_patron(), branch);

        assert!(matches!(
            loaded_at.check_aggregate(&book),
            Err(DomainError::Conflict(_))
        ));
        assert!(ExpectedVersion::Exact(1).check_aggregate(&book).is_ok());
    }

    #[derive(Debug, Clone)]
    enum Op {
        PlaceOnHold {
            patron: usize,
            branch: usize,
            hold_minutes: i64,
        },
        Checkout {
            patron: usize,
            branch: usize,
        },
        Return {
            branch: usize,
        },
        CancelHold,
        ExpireHold {
            at_minutes: i64,
        },
    }

    fn op_strategy() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0usize..3, 0usize..3, 0i64..120).prop_map(|(patron, branch, hold_minutes)| {
                Op::PlaceOnHold {
                    patron,
                    branch,
                    hold_minutes,
                }
            }),
            (0usize..3, 0usize..3).prop_map(|(patron, branch)| Op::Checkout { patron, branch }),
            (0usize..3).prop_map(|branch| Op::Return { branch }),
            Just(Op::CancelHold),
            (0i64..180).prop_map(|at_minutes| Op::ExpireHold { at_minutes }),
        ]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 512,
            ..ProptestConfig::default()
        })]

        /// Property: the version only moves forward, by exactly one per
        /// committed transition, and stays put whenever an operation is
        /// refused or fails (with the state untouched as well).
        #[test]
        fn version_tracks_committed_transitions(
            initial_version in 0u64..1_000,
            ops in prop::collection::vec(op_strategy(), 1..40)
        ) {
            let patrons = [test_patron(), test_patron(), test_patron()];
            let branches = [test_branch(), test_branch(), test_branch()];
            let mut book = Book::new(BookId::new(), BookType::Circulating, branches[0], initial_version);

            for op in ops {
                let before = book.clone();
                let committed = match op {
                    Op::PlaceOnHold { patron, branch, hold_minutes } => {
                        let allowed = before.state().can_be_put_on_hold(patrons[patron]);
                        let done = book.place_on_hold(
                            patrons[patron],
                            branches[branch],
                            test_time() + Duration::minutes(hold_minutes),
                        );
                        prop_assert_eq!(allowed, done);
                        done
                    }
                    Op::Checkout { patron, branch } => {
                        let allowed = before.state().can_be_checked_out(patrons[patron]);
                        // Guard predicate and transition agree.
                        prop_assert_eq!(
                            allowed,
                            before.state().checkout(patrons[patron], branches[branch]).is_ok()
                        );
                        let done = book.checkout(patrons[patron], branches[branch]);
                        prop_assert_eq!(allowed, done);
                        done
                    }
                    Op::Return { branch } => {
                        let allowed = before.state().can_be_returned();
                        let done = book.return_book(branches[branch]);
                        prop_assert_eq!(allowed, done);
                        done
                    }
                    Op::CancelHold => {
                        let result = book.cancel_hold();
                        prop_assert_eq!(
                            result.is_ok(),
                            before.current_state() == StateName::OnHold
                        );
                        result.is_ok()
                    }
                    Op::ExpireHold { at_minutes } => {
                        book.expire_hold(test_time() + Duration::minutes(at_minutes)).is_ok()
                    }
                };

                if committed {
                    prop_assert_eq!(book.version(), before.version() + 1);
                } else {
                    prop_assert_eq!(&book, &before);
                }
                prop_assert_eq!(book.current_patron().is_none(), book.current_state() == StateName::Available);
                prop_assert_eq!(book.book_id(), before.book_id());
            }
        }

        /// Property: expiring a hold before its deadline never changes the
        /// hold, at or after the deadline always releases it at the hold branch.
        #[test]
        fn expire_hold_respects_deadline(
            hold_minutes in 0i64..600,
            at_minutes in 0i64..600
        ) {
            let branch = test_branch();
            let patron = test_patron();
            let deadline = test_time() + Duration::minutes(hold_minutes);
            let mut book = test_book(test_branch());
            book.place_on_hold(patron, branch, deadline);
            let held = book.state().clone();

            let now = test_time() + Duration::minutes(at_minutes);
            book.expire_hold(now).unwrap();

            if now < deadline {
                prop_assert_eq!(book.state(), &held);
            } else {
                prop_assert_eq!(book.state(), &BookState::available(branch));
            }
            prop_assert_eq!(book.version(), 2);
        }
    }
}
