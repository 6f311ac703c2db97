//! Block inheritance.

use crate::block::BlockTree;
use crate::error::{ErrorKind, TemplateError};
use log::{trace, warn};

/// Splice every named root block of `child` into `parent`.
///
/// Each one replaces the parent block with the same id, wherever that block
/// is nested. Directives at the child's top level have nowhere to go and are
/// skipped.
pub fn splice(parent: &mut BlockTree, child: &BlockTree) -> Result<(), TemplateError> {
    for &root in child.roots() {
        let block = &child[root];
        if block.is_directive() {
            warn!(
                "`{}` at byte {} is outside any block of an extending template; ignored",
                if block.name.is_empty() { "print" } else { block.name.as_str() },
                block.loc.start
            );
            continue;
        }

        // Rebuilt per block: an earlier graft may have replaced a subtree
        let map = parent.block_map();
        let target = map.get(&block.id).and_then(|path| parent.find_path(path));
        let Some(target) = target else {
            return Err(TemplateError::new(
                ErrorKind::UnresolvedInheritanceTarget,
                format!("Block `{}` does not exist in the parent template", block.id),
                block.loc.start,
            )
            .with_len(block.name.len() + 6)
            .with_help(format!(
                "Known blocks: {}",
                map.iter().map(|(id, _)| id).collect::<Vec<_>>().join(", ")
            )));
        };

        trace!("splice `{}` into {}", block.id, parent.path_of(target));
        parent.graft(target, child, root);
    }
    Ok(())
}
