use std::fmt::Write as _;
use std::fs;
use std::io;
use std::path::Path;

/// Write the collected output dependency edges as a plain DOT digraph.
pub fn write_dot(path: &Path, edges: &[(String, String)]) -> io::Result<()> {
    let mut doc = String::from("digraph {\n");
    for (from, to) in edges {
        let _ = writeln!(doc, "\t\"{from}\" -> \"{to}\";");
    }
    doc.push_str("}\n");
    fs::write(path, doc)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_plain_digraph() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("deps.dot");
        write_dot(&file, &[("app".to_string(), "lib".to_string())]).unwrap();
        let doc = fs::read_to_string(&file).unwrap();
        assert_eq!(doc, "digraph {\n\t\"app\" -> \"lib\";\n}\n");
    }
}
