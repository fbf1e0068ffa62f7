//! Turn arbitrary bytes into a valid fragmentation graph
use mztree::ColoredGraph;

/// Byte 0 gives the number of colors, byte 1 the number of fragments, then one color byte per
/// fragment followed by (source, target, weight) triplets. Losses only go from a lower to a
/// higher fragment index so the graph is always acyclic, fragments that end up without an
/// incoming loss are connected to the root.
pub fn graph(data: &[u8]) -> Option<ColoredGraph<u8>> {
    let (&colors, rest) = data.split_first()?;
    let (&fragments, rest) = rest.split_first()?;
    let colors = usize::from(colors % 12) + 1;
    let fragments = usize::from(fragments % 24);
    if rest.len() < fragments {
        return None;
    }
    let (fragment_colors, rest) = rest.split_at(fragments);

    let mut builder = ColoredGraph::builder(0, colors);
    let mut color = vec![None];
    for (index, c) in fragment_colors.iter().enumerate() {
        let c = usize::from(*c) % colors;
        builder.add_fragment(u8::try_from(index + 1).unwrap_or(u8::MAX), c);
        color.push(Some(c));
    }
    let mut reachable = vec![false; fragments + 1];
    for triplet in rest.chunks_exact(3) {
        let source = usize::from(triplet[0]) % (fragments + 1);
        let target = usize::from(triplet[1]) % (fragments + 1);
        if source >= target || color[source] == color[target] {
            continue;
        }
        builder.add_loss(source, target, f64::from(triplet[2] as i8) / 4.0, 0);
        reachable[target] = true;
    }
    for (fragment, reachable) in reachable.iter().enumerate().skip(1) {
        if !reachable {
            builder.add_loss(0, fragment, 0.0, 0);
        }
    }
    builder.build().ok()
}
