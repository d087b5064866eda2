use crate::core::context::WorkflowContext;
use crate::core::data::ports::Inflow;
use crate::core::data::protocol::ProtocolReader;
use crate::core::error::Result;
use crate::core::node::{NodeCore, WorkflowNode};
use async_trait::async_trait;
use std::sync::Arc;

const OUTFLOW: &str = "outflow";

/// A hidden node feeding an inflow whose scheme resolves outside the workflow.
///
/// The source reads the resource at the inflow's path through the protocol's
/// reader and republishes it as data at that same path.
pub struct SourceNode {
    core: NodeCore,
    reader: Box<dyn ProtocolReader>,
    path: String,
}

impl SourceNode {
    pub(crate) fn for_inflow(
        name: impl Into<String>,
        inflow: &Inflow,
        context: &Arc<WorkflowContext>,
    ) -> Result<Self> {
        let reader = inflow.protocol().new_reader()?;
        let path = inflow.path().to_string();
        let mut core = NodeCore::new(name);
        core.hidden = true;
        core.steps_once = reader.steps_once();
        core.set_context_if_absent(context);
        core.register_outflow(OUTFLOW, &path, false)?;
        Ok(Self { core, reader, path })
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

#[async_trait]
impl WorkflowNode for SourceNode {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn core_mut(&mut self) -> &mut NodeCore {
        &mut self.core
    }

    fn elaborate(&mut self) -> Result<()> {
        Ok(())
    }

    fn initialize(&mut self) -> Result<()> {
        self.core.initialize_ports();
        self.reader.initialize()
    }

    fn ready_for_input_packet(&self, _label: &str) -> Result<bool> {
        Ok(false)
    }

    async fn trigger(&mut self) -> Result<bool> {
        if self.core.is_finished()? || self.core.outputs_ready() {
            return Ok(false);
        }
        if self.core.check_done_stepping()? {
            self.core.send_end_of_stream_packets()?;
            self.core.flag_finished();
            return Ok(true);
        }
        match self.reader.external_resource(&self.path)? {
            None => self.core.flag_done_stepping(),
            Some(value) => {
                let step_id = self.core.record_step_started();
                let variables = self.core.variables.clone();
                self.core.create_and_send_packet(OUTFLOW, value, &variables)?;
                self.core.record_step_completed(Some(step_id));
            }
        }
        Ok(true)
    }

    fn clone_declaration(&self) -> Option<Box<dyn WorkflowNode>> {
        None
    }
}
