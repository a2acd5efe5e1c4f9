//! ASCII tree rendering for categories and package contents.

use crate::error::Result;
use crate::models::{CategoryItem, PackageItem, VersionedRecord};

const TAGGED: char = '●';
const UNTAGGED: char = '○';
const FUNCTION: char = 'ƒ';

/// One line of a rendered tree, with its nested children.
#[derive(Debug, Clone, PartialEq)]
pub struct TreeNode {
    pub label: String,
    pub marker: Option<char>,
    pub children: Vec<TreeNode>,
}

impl TreeNode {
    fn leaf(label: String, marker: char) -> Self {
        Self {
            label,
            marker: Some(marker),
            children: Vec::new(),
        }
    }
}

/// Build the subtree below `category`.
pub fn category_tree(category: &CategoryItem) -> Result<TreeNode> {
    let children = category
        .children()?
        .iter()
        .map(category_tree)
        .collect::<Result<Vec<_>>>()?;
    Ok(TreeNode {
        label: category.name().to_string(),
        marker: None,
        children,
    })
}

/// Build a tree of a package's assets and functions.
///
/// Assets are marked by whether they carry a lifecycle state.
pub fn package_tree(package: &PackageItem) -> Result<TreeNode> {
    let mut children = Vec::new();
    for asset in package.rules()? {
        let asset = asset?;
        let (marker, state) = match asset.state_name()? {
            Some(state) => (TAGGED, format!(" [{}]", state)),
            None => (UNTAGGED, String::new()),
        };
        children.push(TreeNode::leaf(
            format!("{} v{}{}", asset.name(), asset.version_number(), state),
            marker,
        ));
    }
    for function in package.functions()? {
        children.push(TreeNode::leaf(
            format!("{} v{}", function.name(), function.version_number()),
            FUNCTION,
        ));
    }
    Ok(TreeNode {
        label: format!("{} (version {})", package.name(), package.version_number()),
        marker: None,
        children,
    })
}

/// Render trees as ASCII art.
///
/// Example output:
/// ```text
/// pricing (version 3)
/// ├── ● discount v4 [deployed]
/// ├── ○ surcharge v1
/// └── ƒ round v2
/// ```
pub fn render_tree(nodes: &[TreeNode]) -> String {
    let mut output = String::new();
    for (i, node) in nodes.iter().enumerate() {
        let is_last = i == nodes.len() - 1;
        render_node(&mut output, node, "", is_last, true);
    }
    output
}

/// Recursively render a node and its children.
fn render_node(
    output: &mut String,
    node: &TreeNode,
    prefix: &str,
    is_last: bool,
    is_root: bool,
) {
    if is_root {
        output.push_str(&node.label);
        output.push('\n');
    } else {
        let branch = if is_last { "└── " } else { "├── " };
        output.push_str(prefix);
        output.push_str(branch);
        if let Some(marker) = node.marker {
            output.push(marker);
            output.push(' ');
        }
        output.push_str(&node.label);
        output.push('\n');
    }

    let child_prefix = if is_root {
        String::new()
    } else {
        let continuation = if is_last { "    " } else { "│   " };
        format!("{}{}", prefix, continuation)
    };

    for (i, child) in node.children.iter().enumerate() {
        let child_is_last = i == node.children.len() - 1;
        render_node(output, child, &child_prefix, child_is_last, false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::RulesRepository;

    fn node(label: &str, marker: Option<char>, children: Vec<TreeNode>) -> TreeNode {
        TreeNode {
            label: label.to_string(),
            marker,
            children,
        }
    }

    #[test]
    fn test_single_root() {
        let tree = vec![node("Root", None, vec![])];
        assert_eq!(render_tree(&tree), "Root\n");
    }

    #[test]
    fn test_nested_children() {
        let tree = vec![node(
            "Root",
            None,
            vec![
                node(
                    "Parent",
                    None,
                    vec![node("Child A", Some(TAGGED), vec![]), node("Child B", None, vec![])],
                ),
                node("Sibling", Some(UNTAGGED), vec![]),
            ],
        )];
        let expected = "Root\n\
                        ├── Parent\n\
                        │   ├── ● Child A\n\
                        │   └── Child B\n\
                        └── ○ Sibling\n";
        assert_eq!(render_tree(&tree), expected);
    }

    #[test]
    fn test_package_tree_marks_assets_and_functions() {
        let repo = RulesRepository::open_memory().unwrap();
        let package = repo.create_rule_package("pricing", "prices").unwrap();
        let asset = package.add_asset("discount", "d").unwrap();
        asset.update_state("deployed").unwrap();
        package.add_asset("surcharge", "s").unwrap();
        let function = repo.add_function("round", "fn round()").unwrap();
        package.add_function(&function).unwrap();

        let rendered = render_tree(&[package_tree(&package).unwrap()]);
        assert_eq!(
            rendered,
            "pricing (version 1)\n\
             ├── ● discount v1 [deployed]\n\
             ├── ○ surcharge v1\n\
             └── ƒ round v1\n"
        );
    }

    #[test]
    fn test_category_tree() {
        let repo = RulesRepository::open_memory().unwrap();
        repo.get_or_create_category("finance/tax").unwrap();
        repo.get_or_create_category("hr").unwrap();

        let root = repo.load_category("/").unwrap();
        let rendered = render_tree(&[category_tree(&root).unwrap()]);
        assert_eq!(rendered, "/\n├── finance\n│   └── tax\n└── hr\n");
    }
}
