use std::collections::HashSet;

use super::TransactionId;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum LockMode {
    Shared,
    Exclusive,
}

/// Lock state of a single page.
///
/// A lock only exists while it has holders. The only transition which skips a full
/// release is the upgrade of a sole shared holder to the exclusive holder.
#[derive(Debug, PartialEq, Eq)]
pub(in crate::concurrency) enum Lock {
    Shared(HashSet<TransactionId>),
    Exclusive(TransactionId),
}

impl Lock {
    pub fn new(tid: TransactionId, mode: LockMode) -> Self {
        match mode {
            LockMode::Shared => Lock::Shared(HashSet::from([tid])),
            LockMode::Exclusive => Lock::Exclusive(tid),
        }
    }

    /// Grants the lock in the requested mode if possible. Returns false if the request conflicts
    /// with other holders, in which case the lock is unchanged.
    pub fn try_grant(&mut self, tid: TransactionId, mode: LockMode) -> bool {
        match mode {
            LockMode::Shared => match self {
                Lock::Shared(holders) => {
                    holders.insert(tid);
                    true
                }
                // the exclusive holder may also read, the lock stays exclusive
                Lock::Exclusive(holder) => *holder == tid,
            },
            LockMode::Exclusive => {
                if self.is_sole_holder(tid) {
                    *self = Lock::Exclusive(tid);
                    true
                } else {
                    false
                }
            }
        }
    }

    fn is_sole_holder(&self, tid: TransactionId) -> bool {
        match self {
            Lock::Shared(holders) => holders.len() == 1 && holders.contains(&tid),
            Lock::Exclusive(holder) => *holder == tid,
        }
    }

    /// Removes the transaction from the holders. Returns true if nobody holds the lock anymore.
    pub fn release(&mut self, tid: TransactionId) -> bool {
        match self {
            Lock::Shared(holders) => {
                holders.remove(&tid);
                holders.is_empty()
            }
            Lock::Exclusive(holder) => *holder == tid,
        }
    }

    pub fn mode_of(&self, tid: TransactionId) -> Option<LockMode> {
        match self {
            Lock::Shared(holders) if holders.contains(&tid) => Some(LockMode::Shared),
            Lock::Exclusive(holder) if *holder == tid => Some(LockMode::Exclusive),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Lock, LockMode};
    use crate::concurrency::TransactionId;

    #[test]
    fn shared_holders_accumulate() {
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let mut lock = Lock::new(t1, LockMode::Shared);
        assert!(lock.try_grant(t2, LockMode::Shared));
        assert_eq!(lock.mode_of(t1), Some(LockMode::Shared));
        assert_eq!(lock.mode_of(t2), Some(LockMode::Shared));

        // neither can upgrade while the other one holds the lock
        assert!(!lock.try_grant(t1, LockMode::Exclusive));
        assert!(!lock.release(t2));
        assert!(lock.try_grant(t1, LockMode::Exclusive));
        assert_eq!(lock, Lock::Exclusive(t1));
    }

    #[test]
    fn exclusive_holder_keeps_exclusive_mode() {
        let (t1, t2) = (TransactionId::new(), TransactionId::new());
        let mut lock = Lock::new(t1, LockMode::Exclusive);
        assert!(lock.try_grant(t1, LockMode::Shared));
        assert!(lock.try_grant(t1, LockMode::Exclusive));
        assert_eq!(lock.mode_of(t1), Some(LockMode::Exclusive));

        assert!(!lock.try_grant(t2, LockMode::Shared));
        assert!(!lock.try_grant(t2, LockMode::Exclusive));
        assert_eq!(lock.mode_of(t2), None);

        // releasing on behalf of somebody else does not free the lock
        assert!(!lock.release(t2));
        assert!(lock.release(t1));
    }
}
