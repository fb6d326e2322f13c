//! pulsegrid-doc — operator-annotated JSON merge documents.
//!
//! Every instance in a fleet writes its own JSON contribution; readers
//! fold all contributions into a single aggregate view. Aggregation
//! rules ride inside the documents themselves as single-key operator
//! objects:
//!
//! ```text
//! {"$sum": n}       numeric addition across contributions
//! {"$max": n}       numeric maximum across contributions
//! {"$latest": {..}} contribution with the greatest sibling "timestamp" wins
//! {"$expires": {..}} subtree pruned when sibling "version" falls behind
//!                    the reader's reference version
//! ```
//!
//! Two phases, both pure folds:
//!
//! - [`StatusDoc::absorb`] — operator-aware deep merge of another
//!   contribution into this one.
//! - [`StatusDoc::clean_ops`] — bottom-up evaluation of every operator
//!   against one reference version, unwrapping operator objects to
//!   their resolved values and pruning expired subtrees to `null`.

pub mod doc;
pub mod error;

pub use doc::StatusDoc;
pub use error::{DocError, DocResult};
