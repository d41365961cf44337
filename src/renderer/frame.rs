use crate::error::RendererError;
use crate::renderer::binding::FrameResource;
use crate::renderer::camera::FrameCamera;
use crate::renderer::draw::DrawList;
use crate::renderer::lights::LightSet;
use crate::renderer::material::MaterialState;

/// Stages of one frame, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FrameStage {
    Idle,
    Recording,
    ShadowPasses,
    LightCulling,
    GeometryPrepass,
    MainScenePass,
    DebugOverlay,
    SkyboxComposite,
    Bloom,
    FinalComposite,
    FrameReset,
}

impl FrameStage {
    pub const ORDER: [FrameStage; 11] = [
        FrameStage::Idle,
        FrameStage::Recording,
        FrameStage::ShadowPasses,
        FrameStage::LightCulling,
        FrameStage::GeometryPrepass,
        FrameStage::MainScenePass,
        FrameStage::DebugOverlay,
        FrameStage::SkyboxComposite,
        FrameStage::Bloom,
        FrameStage::FinalComposite,
        FrameStage::FrameReset,
    ];

    /// Stages that may be skipped without breaking the frame.
    pub fn is_optional(self) -> bool {
        matches!(self, FrameStage::DebugOverlay)
    }

    /// Whether `next` may directly follow `self`: the next stage in order,
    /// or the one after it when the stage in between is optional.
    pub fn can_advance_to(self, next: FrameStage) -> bool {
        if self == FrameStage::FrameReset {
            return next == FrameStage::Idle;
        }
        let Some(position) = Self::ORDER.iter().position(|s| *s == self) else {
            return false;
        };
        let mut candidate = position + 1;
        while let Some(stage) = Self::ORDER.get(candidate) {
            if *stage == next {
                return true;
            }
            if !stage.is_optional() {
                return false;
            }
            candidate += 1;
        }
        false
    }
}

/// Per-frame mutable state: the stage machine plus everything the scene
/// records between `begin_frame` and `end_frame`.
pub struct FrameContext {
    stage: FrameStage,
    pub camera: Option<FrameCamera>,
    pub dt: f32,
    pub draws: DrawList,
    pub lights: LightSet,
    pub material: MaterialState,
    rejected_transitions: u32,
}

impl FrameContext {
    pub fn new() -> Self {
        Self {
            stage: FrameStage::Idle,
            camera: None,
            dt: 0.0,
            draws: DrawList::new(),
            lights: LightSet::new(),
            material: MaterialState::default(),
            rejected_transitions: 0,
        }
    }

    pub fn stage(&self) -> FrameStage {
        self.stage
    }

    pub fn is_recording(&self) -> bool {
        self.stage == FrameStage::Recording
    }

    /// Moves to `next`. Out-of-order requests are logged and refused.
    pub fn advance(&mut self, next: FrameStage) -> bool {
        if self.stage.can_advance_to(next) {
            log::trace!("Frame stage {:?} -> {:?}", self.stage, next);
            self.stage = next;
            true
        } else {
            log::warn!(
                "Refusing out-of-order frame transition {:?} -> {:?}",
                self.stage,
                next
            );
            self.rejected_transitions += 1;
            false
        }
    }

    pub fn rejected_transitions(&self) -> u32 {
        self.rejected_transitions
    }

    /// Clears all per-frame state and returns to [`FrameStage::Idle`].
    pub fn reset(&mut self) {
        self.draws.clear();
        self.lights.reset();
        self.material.reset();
        self.camera = None;
        self.dt = 0.0;
        self.stage = FrameStage::Idle;
    }
}

impl Default for FrameContext {
    fn default() -> Self {
        Self::new()
    }
}

/// One pass of the frame graph with the resources it consumes and
/// produces.
#[derive(Debug, Clone)]
pub struct PassNode {
    pub name: &'static str,
    pub stage: FrameStage,
    pub reads: Vec<FrameResource>,
    pub writes: Vec<FrameResource>,
}

impl PassNode {
    pub fn new(name: &'static str, stage: FrameStage) -> Self {
        Self {
            name,
            stage,
            reads: Vec::new(),
            writes: Vec::new(),
        }
    }

    pub fn reads(mut self, resources: &[FrameResource]) -> Self {
        self.reads.extend_from_slice(resources);
        self
    }

    pub fn writes(mut self, resources: &[FrameResource]) -> Self {
        self.writes.extend_from_slice(resources);
        self
    }
}

/// Ordered pass list with explicit data dependencies.
#[derive(Debug, Clone, Default)]
pub struct FrameGraph {
    passes: Vec<PassNode>,
}

impl FrameGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, pass: PassNode) -> &mut Self {
        self.passes.push(pass);
        self
    }

    pub fn passes(&self) -> &[PassNode] {
        &self.passes
    }

    /// Checks that passes appear in stage order and that every resource a
    /// pass reads is external or written by an earlier pass.
    pub fn validate(&self) -> Result<(), RendererError> {
        let mut produced: Vec<FrameResource> = Vec::new();
        let mut last_stage = FrameStage::Idle;

        for pass in &self.passes {
            if pass.stage < last_stage {
                return Err(RendererError::InvalidConfig(format!(
                    "pass '{}' ({:?}) is scheduled after stage {:?}",
                    pass.name, pass.stage, last_stage
                )));
            }
            last_stage = pass.stage;

            for resource in &pass.reads {
                if !resource.is_external() && !produced.contains(resource) {
                    return Err(RendererError::InvalidConfig(format!(
                        "pass '{}' reads {} before any pass writes it",
                        pass.name,
                        resource.label()
                    )));
                }
            }
            produced.extend(pass.writes.iter().copied());
        }
        Ok(())
    }

    /// Name of the pass that last wrote `resource` before pass `index`.
    pub fn producer_of(&self, resource: FrameResource, index: usize) -> Option<&'static str> {
        self.passes[..index.min(self.passes.len())]
            .iter()
            .rev()
            .find(|pass| pass.writes.contains(&resource))
            .map(|pass| pass.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_advance_in_order() {
        let mut frame = FrameContext::new();
        for stage in &FrameStage::ORDER[1..] {
            assert!(frame.advance(*stage), "failed to enter {stage:?}");
        }
        assert!(frame.advance(FrameStage::Idle));
    }

    #[test]
    fn optional_debug_overlay_can_be_skipped() {
        assert!(FrameStage::MainScenePass.can_advance_to(FrameStage::SkyboxComposite));
        assert!(FrameStage::MainScenePass.can_advance_to(FrameStage::DebugOverlay));
    }

    #[test]
    fn out_of_order_transition_is_refused() {
        let mut frame = FrameContext::new();
        assert!(frame.advance(FrameStage::Recording));
        assert!(!frame.advance(FrameStage::MainScenePass));
        assert_eq!(frame.stage(), FrameStage::Recording);
        assert_eq!(frame.rejected_transitions(), 1);
    }

    #[test]
    fn graph_rejects_read_before_write() {
        let mut graph = FrameGraph::new();
        graph
            .add(
                PassNode::new("Main", FrameStage::MainScenePass)
                    .reads(&[FrameResource::SsaoOcclusion]),
            )
            .add(
                PassNode::new("Ssao", FrameStage::GeometryPrepass)
                    .writes(&[FrameResource::SsaoOcclusion]),
            );
        assert!(graph.validate().is_err());
    }

    #[test]
    fn graph_accepts_producer_before_consumer() {
        let mut graph = FrameGraph::new();
        graph
            .add(
                PassNode::new("Culling", FrameStage::LightCulling)
                    .reads(&[FrameResource::PointLights])
                    .writes(&[FrameResource::TileLightCounts]),
            )
            .add(
                PassNode::new("Main", FrameStage::MainScenePass)
                    .reads(&[FrameResource::TileLightCounts]),
            );
        assert!(graph.validate().is_ok());
        assert_eq!(
            graph.producer_of(FrameResource::TileLightCounts, 1),
            Some("Culling")
        );
    }
}
