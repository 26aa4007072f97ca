//! Domain fusions for sparse feature-processing subgraphs.
//!
//! Each fusion is a textual `(pattern, replacement)` pair handed to the
//! subgraph rewriter. Patterns that produce multiple values keep the output
//! order of the fused op distinct from the return order; the replacement
//! graphs swap accordingly.

use crate::ir::{Graph, SubgraphRewriter};

fn rewriter(pairs: &[(&str, &str)]) -> SubgraphRewriter {
    let mut rewriter = SubgraphRewriter::new();
    for (pattern, replacement) in pairs {
        rewriter
            .register(pattern, replacement)
            .expect("fusion pattern must parse");
    }
    rewriter
}

/// cat + add + mul + nan-replace + clamp, with all in-place spellings of the
/// two tail ops, into one fused op.
pub fn concat_add_mul_replacenan_clip(graph: &mut Graph) -> usize {
    let fused = r#"
        graph(%a, %b, %c, %d, %e, %f, %g, %h, %i, %j):
          %res = sparse::concat_add_mul_replacenan_clip(%c, %e, %a, %i, %j)
          return (%res)
    "#;
    let tails = [
        ("aten::nan_to_num", "aten::clamp"),
        ("aten::nan_to_num_", "aten::clamp"),
        ("aten::nan_to_num_", "aten::clamp_"),
        ("aten::nan_to_num", "aten::clamp_"),
    ];
    let mut applied = 0;
    for (replace_nan, clamp) in tails {
        let pattern = format!(
            r#"
            graph(%a, %b, %c, %d, %e, %f, %g, %h, %i, %j):
              %y0 = aten::cat(%a, %b)
              %y1 = aten::add(%y0, %c, %d)
              %y2 = aten::mul(%y1, %e)
              %y3 = {replace_nan}(%y2, %f, %g, %h)
              %res = {clamp}(%y3, %i, %j)
              return (%res)
            "#
        );
        applied += rewriter(&[(pattern.as_str(), fused)]).run(graph);
    }
    applied
}

/// cast + one-hot + cast into the pre-casted fused op.
pub fn casted_batch_one_hot_lengths(graph: &mut Graph) -> usize {
    let pattern = r#"
        graph(%a, %b, %c, %d, %e, %f, %g):
          %y0 : Tensor = aten::to(%a, %b, %c, %c, %d)
          %y1 : Tensor = sparse::batch_one_hot_lengths(%y0, %e, %f)
          %res : Tensor = aten::to(%y1, %g, %c, %c, %d)
          return (%res)
    "#;
    let fused = r#"
        graph(%a, %b, %c, %d, %e, %f, %g):
          %res : Tensor = sparse::casted_batch_one_hot_lengths(%a, %e, %f)
          return (%res)
    "#;
    rewriter(&[(pattern, fused)]).run(graph)
}

/// stack + transpose + bmm + flatten + index_select into one gather op.
pub fn concat_batch_matmul_batch_gather(graph: &mut Graph) -> usize {
    let pattern = r#"
        graph(%a, %b, %c, %d, %e, %f):
          %y0 : Tensor = aten::stack(%a, %b)
          %y1 : Tensor = aten::transpose(%y0, %b, %c)
          %y2 : Tensor = aten::bmm(%y0, %y1)
          %y3 : Tensor = aten::flatten(%y2, %d, %e)
          %res : Tensor = aten::index_select(%y3, %b, %f)
          return (%res)
    "#;
    let fused = r#"
        graph(%a, %b, %c, %d, %e, %f):
          %res : Tensor = sparse::concat_batch_matmul_batch_gather(%f, %a)
          return (%res)
    "#;
    rewriter(&[(pattern, fused)]).run(graph)
}

/// clip + gather + lengths-to-offsets into one op returning values and
/// offsets.
pub fn clip_ranges_gather_lengths_to_offsets(graph: &mut Graph) -> usize {
    let pattern = r#"
        graph(%a, %b, %c, %d):
          %y0 : Tensor = sparse::clip_ranges(%b, %c)
          %y1 : Tensor, %y2 : Tensor = sparse::gather_ranges(%a, %y0)
          %y3 : Tensor = sparse::lengths_to_offsets(%y2, %d)
          return (%y3, %y1)
    "#;
    let fused = r#"
        graph(%a, %b, %c, %d):
          %y0 : Tensor, %y1 : Tensor = sparse::clip_ranges_gather_lengths_to_offsets(%a, %b, %c, %d)
          return (%y1, %y0)
    "#;
    rewriter(&[(pattern, fused)]).run(graph)
}

/// Fused clip+gather+offsets followed by hashing, into the all-in-one op.
pub fn clip_ranges_gather_hash_offsets(graph: &mut Graph) -> usize {
    let pattern = r#"
        graph(%a, %b, %c, %d, %e, %f, %g):
          %y0 : Tensor, %y1 : Tensor = sparse::clip_ranges_gather_lengths_to_offsets(%a, %b, %c, %d)
          %y2 : Tensor = sparse::bucket_hash(%y0, %e, %f, %g)
          return (%y2, %y1)
    "#;
    let fused = r#"
        graph(%a, %b, %c, %d, %e, %f, %g):
          %off : Tensor, %out : Tensor = sparse::clip_ranges_gather_hash_offsets(%b, %a, %c, %e, %f, %g, %d)
          return (%out, %off)
    "#;
    rewriter(&[(pattern, fused)]).run(graph)
}

/// Raw clip + gather + hash chain into the fused hash op.
pub fn clip_ranges_gather_hash(graph: &mut Graph) -> usize {
    let pattern = r#"
        graph(%a, %b, %c, %d, %e, %f):
          %y0 : Tensor = sparse::clip_ranges(%b, %c)
          %y1 : Tensor, %y2 : Tensor = sparse::gather_ranges(%a, %y0)
          %y3 : Tensor = sparse::bucket_hash(%y1, %d, %e, %f)
          return (%y3, %y2)
    "#;
    let fused = r#"
        graph(%a, %b, %c, %d, %e, %f):
          %off : Tensor, %out : Tensor = sparse::clip_ranges_gather_hash(%b, %a, %c, %d, %e, %f)
          return (%out, %off)
    "#;
    rewriter(&[(pattern, fused)]).run(graph)
}

/// clip + gather without the offsets conversion.
pub fn clip_ranges_gather(graph: &mut Graph) -> usize {
    let pattern = r#"
        graph(%a, %b, %c):
          %y0 : Tensor = sparse::clip_ranges(%b, %c)
          %y1 : Tensor, %y2 : Tensor = sparse::gather_ranges(%a, %y0)
          return (%y2, %y1)
    "#;
    let fused = r#"
        graph(%a, %b, %c):
          %y0 : Tensor, %y1 : Tensor = sparse::clip_ranges_gather(%a, %b, %c)
          return (%y1, %y0)
    "#;
    rewriter(&[(pattern, fused)]).run(graph)
}

/// Runs the seven fusion rewrites in dependency order: the hash fusions are
/// tried before the plain clip+gather collapse so the richer fusion wins.
pub fn fuse_sparse_ops(graph: &mut Graph) -> usize {
    let mut applied = 0;
    applied += concat_add_mul_replacenan_clip(graph);
    applied += casted_batch_one_hot_lengths(graph);
    applied += concat_batch_matmul_batch_gather(graph);

    applied += clip_ranges_gather_lengths_to_offsets(graph);
    applied += clip_ranges_gather_hash_offsets(graph);
    applied += clip_ranges_gather_hash(graph);

    applied += clip_ranges_gather(graph);
    applied
}
