//! An ordered set backed by a B+ tree.
//!
//! This crate provides [`BPlusSet`], an in-memory set container with
//! O(log n) membership, insertion, and removal, and a sorted forward
//! iterator that walks the chained leaf level in O(1) per step.
//!
//! # Example
//!
//! ```
//! use bplus_set::BPlusSet;
//!
//! let mut visited = BPlusSet::new();
//!
//! visited.insert(30);
//! visited.insert(10);
//! visited.insert(20);
//!
//! assert!(visited.contains(&20));
//! assert!(!visited.insert(10)); // duplicates are rejected
//!
//! let in_order: Vec<_> = visited.iter().copied().collect();
//! assert_eq!(in_order, [10, 20, 30]);
//! ```
//!
//! # Features
//!
//! - **`no_std` compatible** - only requires `alloc`.
//! - **Chained leaves** - all keys live in leaf nodes linked in key order,
//!   so full iteration never revisits the routing levels.
//! - **Arena storage** - nodes are slots in one arena addressed by compact
//!   handles; sibling links carry no ownership and destruction follows the
//!   parent-child edges alone.
//!
//! # Implementation
//!
//! The tree keeps every non-root node between `N` and `2N` keys (order
//! `N = 3`). An oversize node is split by its parent, an undersize node is
//! rescued by redistributing one key from its larger sibling or by fusing
//! with it; the root grows a level when it splits and collapses onto a lone
//! child when emptied.

#![no_std]
// These forbid rules and lint groups are meant to be very restrictive.
#![forbid(unsafe_code)]
#![forbid(keyword_idents)]
#![forbid(non_ascii_idents)]
#![forbid(unreachable_pub)]
#![warn(clippy::all)]
#![warn(clippy::cargo)]
#![warn(clippy::pedantic)]

extern crate alloc;

mod raw;

pub mod bplus_set;

pub use bplus_set::BPlusSet;
