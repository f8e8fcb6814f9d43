use config_block_core::{BlockId, Document};

/// Render the block tree under `roots` with a configurable max depth.
///
/// Each line shows the block keyword and name plus its attribute count.
pub fn render_tree(doc: &Document, roots: &[BlockId], max_depth: usize) -> String {
    let mut out = String::new();
    for root in roots {
        render_block(doc, *root, 0, max_depth, &mut out);
    }
    out
}

fn render_block(doc: &Document, id: BlockId, depth: usize, max_depth: usize, out: &mut String) {
    let block = doc.block(id);
    let indent = "  ".repeat(depth);
    out.push_str(&format!("{}{} {}", indent, block.kind.keyword(), block.name));
    if !block.attributes.is_empty() {
        out.push_str(&format!(" ({} set)", block.attributes.len()));
    }
    out.push('\n');

    if depth >= max_depth {
        return;
    }

    for (child, _) in doc.children(id) {
        render_block(doc, child, depth + 1, max_depth, out);
    }
}

#[cfg(test)]
mod tests {
    use config_block_core::parse;

    use super::render_tree;

    const TEXT: &str = "\
config firewall address
    edit \"lan\"
        set subnet 192.168.1.0 255.255.255.0
        set comment \"office\"
    next
end
";

    #[test]
    fn renders_blocks_with_attribute_counts() {
        let doc = parse(TEXT).expect("parse");
        let out = render_tree(&doc, doc.roots(), 3);
        assert_eq!(out, "config firewall address\n  edit lan (2 set)\n");
    }

    #[test]
    fn depth_zero_shows_only_roots() {
        let doc = parse(TEXT).expect("parse");
        assert_eq!(render_tree(&doc, doc.roots(), 0), "config firewall address\n");
    }
}
