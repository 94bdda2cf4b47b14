use crate::{
    bytecode::vm::{Frame, FrameState},
    heap::HeapId,
};

/// A generator: a thin identity around exactly one suspended frame.
///
/// While the frame runs on a consuming thread the generator holds nothing, which is how
/// re-entrant resumption is detected. An exhausted frame is kept with its operand stack
/// and locals already released, so resuming it again needs no frame push.
#[derive(Debug)]
pub(crate) struct Generator {
    name: String,
    frame: Option<Box<Frame>>,
}

impl Generator {
    #[must_use]
    pub fn new(name: String) -> Self {
        Self { name, frame: None }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Parks `frame` inside the generator.
    pub fn park(&mut self, frame: Box<Frame>) {
        self.frame = Some(frame);
    }

    /// Takes the frame out for one resumption, `None` if it is already executing.
    pub fn take(&mut self) -> Option<Box<Frame>> {
        self.frame.take()
    }

    #[must_use]
    pub fn state(&self) -> Option<FrameState> {
        self.frame.as_ref().map(|f| f.state)
    }

    pub(crate) fn collect_refs(&self, work_list: &mut Vec<HeapId>) {
        if let Some(frame) = &self.frame {
            frame.collect_refs(work_list);
        }
    }
}
