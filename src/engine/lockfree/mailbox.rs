//! ### English
//! Two-slot "latest value wins" mailbox for producer → single-consumer handoff.
//!
//! The producer never blocks and never overwrites the slot the consumer is copying out of.
//! Every value that is replaced before it was consumed is counted as dropped.
//!
//! ### 中文
//! 双槽位“最新值优先”的 mailbox，用于生产者 → 单消费者的传递。
//!
//! 生产者从不阻塞，也从不覆盖消费者正在取出的槽位；未被消费就被替换的值计入 dropped。

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, Ordering};

/// ### English
/// Sentinel index meaning "no slot".
///
/// ### 中文
/// 表示“无槽位”的哨兵索引。
const NONE: u8 = 3;

const LATEST_MASK: u8 = 0b0011;
const READING_SHIFT: u8 = 2;

#[inline]
fn pack(latest: u8, reading: u8) -> u8 {
    (latest & LATEST_MASK) | ((reading & LATEST_MASK) << READING_SHIFT)
}

#[inline]
fn unpack(state: u8) -> (u8, u8) {
    (state & LATEST_MASK, (state >> READING_SHIFT) & LATEST_MASK)
}

/// ### English
/// Outcome of one `publish` call.
///
/// ### 中文
/// 一次 `publish` 调用的结果。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Publish {
    /// ### English
    /// Stored; nothing unread was lost.
    ///
    /// ### 中文
    /// 已写入，未丢失任何未读值。
    Stored,
    /// ### English
    /// Stored; the previous unread value was discarded.
    ///
    /// ### 中文
    /// 已写入，但丢弃了之前未读的值。
    Replaced,
    /// ### English
    /// Not stored (another producer was mid-write); the new value was discarded.
    ///
    /// ### 中文
    /// 未写入（另一个生产者正在写入），新值被丢弃。
    Dropped,
}

/// ### English
/// Counters exposed for diagnostics.
///
/// ### 中文
/// 供诊断使用的计数器。
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct MailboxStats {
    pub published: u64,
    pub consumed: u64,
    pub dropped: u64,
}

/// ### English
/// Double-buffered mailbox.
///
/// One `AtomicU8` packs `(latest, reading)`:
/// - `latest`: slot holding the newest complete value, or `NONE`.
/// - `reading`: slot the consumer is currently copying out of, or `NONE`.
///
/// The producer writes into a slot that is neither; the value becomes visible with a release
/// CAS on the state byte. The consumer claims `latest` with an acquire CAS that moves it into
/// `reading`, so it can never observe a half-written value.
///
/// ### 中文
/// 双缓冲 mailbox。
///
/// 一个 `AtomicU8` 打包 `(latest, reading)`：
/// - `latest`：保存最新完整值的槽位，或 `NONE`。
/// - `reading`：消费者正在取出的槽位，或 `NONE`。
///
/// 生产者写入两者之外的槽位，并通过对状态字节的 release CAS 发布；消费者通过 acquire CAS
/// 把 `latest` 移到 `reading` 来认领，因此永远不会观察到写了一半的值。
pub struct Mailbox<T> {
    slots: [UnsafeCell<Option<T>>; 2],
    state: AtomicU8,
    /// ### English
    /// Guards against two producers racing on the same free slot.
    ///
    /// ### 中文
    /// 防止两个生产者竞争同一个空闲槽位。
    producing: AtomicBool,
    published: AtomicU64,
    consumed: AtomicU64,
    dropped: AtomicU64,
}

unsafe impl<T: Send> Send for Mailbox<T> {}
unsafe impl<T: Send> Sync for Mailbox<T> {}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slots: [UnsafeCell::new(None), UnsafeCell::new(None)],
            state: AtomicU8::new(pack(NONE, NONE)),
            producing: AtomicBool::new(false),
            published: AtomicU64::new(0),
            consumed: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    /// ### English
    /// Publishes `value` as the newest one. Never blocks.
    ///
    /// ### 中文
    /// 将 `value` 发布为最新值。永不阻塞。
    pub fn publish(&self, value: T) -> Publish {
        if self.producing.swap(true, Ordering::Acquire) {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return Publish::Dropped;
        }

        let mut state = self.state.load(Ordering::Acquire);
        let (mut retracted, slot) = loop {
            let (latest, reading) = unpack(state);
            if let Some(free) = (0u8..2).find(|&i| i != latest && i != reading) {
                break (false, free);
            }

            // Both slots are busy: `latest` is unread and the consumer is inside `reading`.
            // Take `latest` back so the consumer cannot claim it while we overwrite it.
            match self.state.compare_exchange_weak(
                state,
                pack(NONE, reading),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break (true, latest),
                Err(actual) => state = actual,
            }
        };

        unsafe {
            *self.slots[slot as usize].get() = Some(value);
        }

        let mut state = self.state.load(Ordering::Relaxed);
        loop {
            let (latest, reading) = unpack(state);
            debug_assert_ne!(reading, slot);
            match self.state.compare_exchange_weak(
                state,
                pack(slot, reading),
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if latest != NONE {
                        retracted = true;
                    }
                    break;
                }
                Err(actual) => state = actual,
            }
        }

        self.producing.store(false, Ordering::Release);
        self.published.fetch_add(1, Ordering::Relaxed);
        if retracted {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            Publish::Replaced
        } else {
            Publish::Stored
        }
    }

    /// ### English
    /// Takes the newest value if one is pending.
    ///
    /// ### 中文
    /// 若有待取值则取出最新值。
    pub fn try_consume(&self) -> Option<T> {
        let mut state = self.state.load(Ordering::Acquire);
        let latest = loop {
            let (latest, reading) = unpack(state);
            if latest == NONE || reading != NONE {
                return None;
            }
            match self.state.compare_exchange_weak(
                state,
                pack(NONE, latest),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break latest,
                Err(actual) => state = actual,
            }
        };

        let value = unsafe { (*self.slots[latest as usize].get()).take() };
        self.state
            .fetch_or(NONE << READING_SHIFT, Ordering::Release);

        if value.is_some() {
            self.consumed.fetch_add(1, Ordering::Relaxed);
        }
        value
    }

    /// ### English
    /// Returns whether an unread value is waiting.
    ///
    /// ### 中文
    /// 返回是否有未读值在等待。
    #[inline]
    pub fn has_pending(&self) -> bool {
        unpack(self.state.load(Ordering::Acquire)).0 != NONE
    }

    pub fn stats(&self) -> MailboxStats {
        MailboxStats {
            published: self.published.load(Ordering::Relaxed),
            consumed: self.consumed.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;

    use super::*;

    #[derive(Clone, Debug, PartialEq)]
    struct Payload {
        seq: u64,
        words: Vec<u64>,
    }

    impl Payload {
        fn new(seq: u64) -> Self {
            Self {
                seq,
                words: vec![seq; 16],
            }
        }

        fn is_whole(&self) -> bool {
            self.words.iter().all(|&w| w == self.seq)
        }
    }

    #[test]
    fn empty_mailbox_yields_nothing() {
        let mailbox = Mailbox::<u32>::new();
        assert!(!mailbox.has_pending());
        assert_eq!(mailbox.try_consume(), None);
    }

    #[test]
    fn n_unread_publishes_keep_only_the_last() {
        let mailbox = Mailbox::new();
        for n in 1..=7u64 {
            mailbox.publish(Payload::new(n));
        }

        let got = mailbox.try_consume().expect("value");
        assert_eq!(got.seq, 7);
        assert!(got.is_whole());
        assert_eq!(mailbox.dropped(), 6);
        assert_eq!(mailbox.try_consume(), None);
    }

    #[test]
    fn drop_count_excludes_consumed_values() {
        let mailbox = Mailbox::new();
        mailbox.publish(1u32);
        mailbox.publish(2);
        assert_eq!(mailbox.try_consume(), Some(2));
        mailbox.publish(3);
        mailbox.publish(4);
        mailbox.publish(5);
        assert_eq!(mailbox.try_consume(), Some(5));

        let stats = mailbox.stats();
        assert_eq!(stats.published, 5);
        assert_eq!(stats.consumed, 2);
        assert_eq!(stats.dropped, 3);
    }

    #[test]
    fn first_publish_is_stored_then_replaced() {
        let mailbox = Mailbox::new();
        assert_eq!(mailbox.publish(1u8), Publish::Stored);
        assert_eq!(mailbox.publish(2u8), Publish::Replaced);
        assert_eq!(mailbox.try_consume(), Some(2));
        assert_eq!(mailbox.publish(3u8), Publish::Stored);
    }

    #[test]
    fn concurrent_consumer_never_sees_torn_or_stale_values() {
        let mailbox = Arc::new(Mailbox::new());
        let producer_box = mailbox.clone();
        const N: u64 = 20_000;

        let producer = thread::spawn(move || {
            for n in 1..=N {
                producer_box.publish(Payload::new(n));
            }
        });

        let mut last = 0u64;
        let mut seen = 0u64;
        while last < N {
            if let Some(value) = mailbox.try_consume() {
                assert!(value.is_whole());
                assert!(value.seq > last);
                last = value.seq;
                seen += 1;
            } else if producer.is_finished() && !mailbox.has_pending() {
                break;
            }
        }
        producer.join().expect("producer");
        if let Some(value) = mailbox.try_consume() {
            assert!(value.seq > last);
            last = value.seq;
            seen += 1;
        }

        assert_eq!(last, N);
        let stats = mailbox.stats();
        assert_eq!(stats.published, N);
        assert_eq!(stats.consumed, seen);
        assert_eq!(stats.dropped, N - seen);
    }
}
