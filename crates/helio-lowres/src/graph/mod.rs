//! Render graph with automatic dependency resolution
//!
//! Passes declare the resources they read and write. Dependencies follow
//! registration order: a reader depends on the most recent earlier writer, and a
//! writer depends on the earlier writer and on every reader since it. The
//! resulting DAG is sorted with Kahn's algorithm, always taking the ready pass
//! that was registered first, so a valid registration order is kept as is.

mod pass;
mod resource;

pub use pass::{begin_render_pass, PassContext, PrepareContext, RenderPass};
pub use resource::{PassId, ResourceHandle};

use crate::{Error, Result};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

/// Render graph for automatic pass ordering
pub struct RenderGraph {
    passes: Vec<PassNode>,
    execution_order: Vec<usize>,
    built: bool,
}

struct PassNode {
    pass: Box<dyn RenderPass>,
    reads: Vec<ResourceHandle>,
    writes: Vec<ResourceHandle>,
}

impl RenderGraph {
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            execution_order: Vec::new(),
            built: false,
        }
    }

    /// Add a pass to the graph
    pub fn add_pass(&mut self, pass: impl RenderPass + 'static) -> PassId {
        let id = PassId(self.passes.len());

        let mut builder = PassResourceBuilder::new();
        pass.declare_resources(&mut builder);

        self.passes.push(PassNode {
            pass: Box::new(pass),
            reads: builder.reads,
            writes: builder.writes,
        });
        self.built = false;
        id
    }

    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }

    /// Pass names in execution order
    pub fn execution_order(&self) -> Vec<&str> {
        self.execution_order
            .iter()
            .map(|&i| self.passes[i].pass.name())
            .collect()
    }

    /// Build the graph - validate declarations and determine execution order
    pub fn build(&mut self) -> Result<()> {
        log::info!("Building render graph with {} passes", self.passes.len());

        for node in &self.passes {
            if let Some(handle) = node.reads.iter().find(|r| node.writes.contains(r)) {
                return Err(Error::Graph(format!(
                    "pass '{}' both reads and writes {:?}",
                    node.pass.name(),
                    handle
                )));
            }
        }

        let edges = dependency_edges(self.passes.iter().map(|n| (n.reads.as_slice(), n.writes.as_slice())));
        let order = topological_order(self.passes.len(), &edges).ok_or_else(|| {
            Error::Graph("Cyclic dependency detected in render graph".to_string())
        })?;

        self.execution_order = order;
        self.built = true;

        for (i, &pass_idx) in self.execution_order.iter().enumerate() {
            log::debug!("  Pass {}: {}", i, self.passes[pass_idx].pass.name());
        }
        log::info!("Render graph built successfully");
        Ok(())
    }

    /// Let every pass upload its per-frame data
    pub fn prepare(&mut self, ctx: &PrepareContext) -> Result<()> {
        self.ensure_built()?;
        for &pass_idx in &self.execution_order {
            self.passes[pass_idx].pass.prepare(ctx)?;
        }
        Ok(())
    }

    /// Record every pass in execution order
    pub fn execute(&mut self, ctx: &mut PassContext) -> Result<()> {
        self.ensure_built()?;
        for &pass_idx in &self.execution_order {
            let node = &mut self.passes[pass_idx];
            log::trace!("  Executing pass: {}", node.pass.name());
            node.pass.execute(ctx)?;
        }
        Ok(())
    }

    fn ensure_built(&self) -> Result<()> {
        if self.built {
            Ok(())
        } else {
            Err(Error::Graph("render graph used before build()".to_string()))
        }
    }
}

impl Default for RenderGraph {
    fn default() -> Self {
        Self::new()
    }
}

/// Edges `(before, after)` implied by read/write declarations in registration order
fn dependency_edges<'a>(
    passes: impl Iterator<Item = (&'a [ResourceHandle], &'a [ResourceHandle])>,
) -> Vec<(usize, usize)> {
    let mut last_writer: HashMap<ResourceHandle, usize> = HashMap::new();
    let mut readers_since_write: HashMap<ResourceHandle, Vec<usize>> = HashMap::new();
    let mut edges = Vec::new();

    for (i, (reads, writes)) in passes.enumerate() {
        for resource in reads {
            if let Some(&writer) = last_writer.get(resource) {
                edges.push((writer, i));
            }
            readers_since_write.entry(*resource).or_default().push(i);
        }
        for resource in writes {
            if let Some(&writer) = last_writer.get(resource) {
                edges.push((writer, i));
            }
            if let Some(readers) = readers_since_write.remove(resource) {
                edges.extend(readers.into_iter().filter(|&r| r != i).map(|r| (r, i)));
            }
            last_writer.insert(*resource, i);
        }
    }

    edges.sort_unstable();
    edges.dedup();
    edges
}

/// Kahn's algorithm, lowest ready index first. `None` on a cycle.
fn topological_order(count: usize, edges: &[(usize, usize)]) -> Option<Vec<usize>> {
    let mut in_degree = vec![0usize; count];
    let mut adj_list: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(from, to) in edges {
        adj_list[from].push(to);
        in_degree[to] += 1;
    }

    let mut ready: BinaryHeap<Reverse<usize>> =
        (0..count).filter(|&i| in_degree[i] == 0).map(Reverse).collect();
    let mut order = Vec::with_capacity(count);

    while let Some(Reverse(node)) = ready.pop() {
        order.push(node);
        for &neighbor in &adj_list[node] {
            in_degree[neighbor] -= 1;
            if in_degree[neighbor] == 0 {
                ready.push(Reverse(neighbor));
            }
        }
    }

    (order.len() == count).then_some(order)
}

/// Builder for declaring pass resource dependencies
pub struct PassResourceBuilder {
    reads: Vec<ResourceHandle>,
    writes: Vec<ResourceHandle>,
}

impl PassResourceBuilder {
    fn new() -> Self {
        Self { reads: Vec::new(), writes: Vec::new() }
    }

    /// Declare that this pass reads a resource
    pub fn read(&mut self, resource: ResourceHandle) -> &mut Self {
        if !self.reads.contains(&resource) {
            self.reads.push(resource);
        }
        self
    }

    /// Declare that this pass writes to a resource
    pub fn write(&mut self, resource: ResourceHandle) -> &mut Self {
        if !self.writes.contains(&resource) {
            self.writes.push(resource);
        }
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Stub {
        name: &'static str,
        reads: Vec<ResourceHandle>,
        writes: Vec<ResourceHandle>,
    }

    impl Stub {
        fn new(name: &'static str, reads: &[ResourceHandle], writes: &[ResourceHandle]) -> Self {
            Self { name, reads: reads.to_vec(), writes: writes.to_vec() }
        }
    }

    impl RenderPass for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn declare_resources(&self, builder: &mut PassResourceBuilder) {
            for &r in &self.reads {
                builder.read(r);
            }
            for &w in &self.writes {
                builder.write(w);
            }
        }

        fn execute(&mut self, _ctx: &mut PassContext) -> Result<()> {
            Ok(())
        }
    }

    use ResourceHandle as R;

    #[test]
    fn frame_passes_run_in_pipeline_order() {
        // Surface the pass order logged by build when run with RUST_LOG=debug
        let _ = env_logger::builder().is_test(true).try_init();

        let mut graph = RenderGraph::new();
        graph.add_pass(Stub::new("depth", &[], &[R::SCENE_DEPTH]));
        graph.add_pass(Stub::new("shadow", &[], &[R::SHADOW_VSM]));
        graph.add_pass(Stub::new("geometry", &[R::SCENE_DEPTH, R::SHADOW_VSM], &[R::SCENE_COLOR]));
        graph.add_pass(Stub::new("sky", &[R::SCENE_DEPTH], &[R::SCENE_COLOR]));
        graph.add_pass(Stub::new("downscale", &[R::SCENE_DEPTH], &[R::LOW_RES_DEPTH]));
        graph.add_pass(Stub::new(
            "particles",
            &[R::SHADOW_VSM, R::SCENE_DEPTH],
            &[R::LOW_RES_COLOR, R::LOW_RES_DEPTH, R::SCENE_COLOR],
        ));
        graph.add_pass(Stub::new("lowres_resolve", &[R::LOW_RES_COLOR, R::LOW_RES_DEPTH], &[R::LOW_RES_RESOLVED]));
        graph.add_pass(Stub::new(
            "composite",
            &[R::SCENE_DEPTH, R::LOW_RES_COLOR, R::LOW_RES_DEPTH, R::LOW_RES_RESOLVED],
            &[R::SCENE_COLOR],
        ));
        graph.add_pass(Stub::new("resolve", &[R::SCENE_COLOR], &[R::RESOLVED_COLOR]));
        graph.add_pass(Stub::new("post", &[R::RESOLVED_COLOR, R::SCENE_DEPTH], &[R::OUTPUT]));
        graph.build().unwrap();

        assert_eq!(
            graph.execution_order(),
            vec![
                "depth", "shadow", "geometry", "sky", "downscale", "particles",
                "lowres_resolve", "composite", "resolve", "post"
            ]
        );
    }

    #[test]
    fn writers_wait_for_earlier_readers() {
        // "b" reads A before "c" overwrites it, so c must follow b
        let edges = dependency_edges(
            [
                (&[][..], &[R::SCENE_COLOR][..]),
                (&[R::SCENE_COLOR][..], &[R::RESOLVED_COLOR][..]),
                (&[][..], &[R::SCENE_COLOR][..]),
            ]
            .into_iter(),
        );
        assert!(edges.contains(&(0, 1)));
        assert!(edges.contains(&(1, 2)));
        assert!(edges.contains(&(0, 2)));
    }

    #[test]
    fn reads_without_writer_add_no_edges() {
        let edges = dependency_edges([(&[R::OUTPUT][..], &[][..]), (&[R::OUTPUT][..], &[][..])].into_iter());
        assert!(edges.is_empty());
    }

    #[test]
    fn independent_passes_keep_registration_order() {
        let mut graph = RenderGraph::new();
        graph.add_pass(Stub::new("a", &[], &[R::named("x")]));
        graph.add_pass(Stub::new("b", &[], &[R::named("y")]));
        graph.add_pass(Stub::new("c", &[], &[R::named("z")]));
        graph.build().unwrap();
        assert_eq!(graph.execution_order(), vec!["a", "b", "c"]);
    }

    #[test]
    fn read_write_of_same_resource_is_rejected() {
        let mut graph = RenderGraph::new();
        graph.add_pass(Stub::new("feedback", &[R::SCENE_COLOR], &[R::SCENE_COLOR]));
        assert!(matches!(graph.build(), Err(Error::Graph(_))));
    }

    #[test]
    fn cycles_are_detected() {
        assert!(topological_order(2, &[(0, 1), (1, 0)]).is_none());
        assert_eq!(topological_order(3, &[(2, 0)]), Some(vec![1, 2, 0]));
    }

    #[test]
    fn named_handles_are_deterministic_and_distinct_from_builtins() {
        assert_eq!(R::named("bloom"), R::named("bloom"));
        assert_ne!(R::named("bloom"), R::named("glow"));
        assert_ne!(R::named("bloom"), R::OUTPUT);
    }
}
