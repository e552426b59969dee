//! In-memory server that records submissions for state machine tests

use super::{DeviceServer, OpId, SampleSpec, ServerError};

/// An operation submitted to the [`MockServer`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Submitted {
    Connect,
    Lookup { id: OpId, name: String },
    LoadModule { id: OpId, module: String, args: String },
    SetMute { id: OpId, name: String, mute: bool },
    Subscribe { id: OpId },
    ConnectRecord { device: String, spec: SampleSpec },
    Disconnect,
}

#[derive(Debug, Default)]
pub struct MockServer {
    pub submitted: Vec<Submitted>,
    next_id: u64,
    /// Error returned by the next `connect_record`
    pub fail_connect_record: Option<String>,
}

impl MockServer {
    fn next_op(&mut self) -> OpId {
        self.next_id += 1;
        OpId(self.next_id)
    }

    /// Id of the lookup submitted for `name`
    pub fn lookup_id(&self, name: &str) -> Option<OpId> {
        self.submitted.iter().find_map(|s| match s {
            Submitted::Lookup { id, name: n } if n == name => Some(*id),
            _ => None,
        })
    }

    /// Mute commands in submission order
    pub fn mute_commands(&self) -> Vec<(OpId, bool)> {
        self.submitted
            .iter()
            .filter_map(|s| match s {
                Submitted::SetMute { id, mute, .. } => Some((*id, *mute)),
                _ => None,
            })
            .collect()
    }

    pub fn last_id(&self) -> OpId {
        OpId(self.next_id)
    }
}

impl DeviceServer for MockServer {
    fn connect(&mut self) {
        self.submitted.push(Submitted::Connect);
    }

    fn lookup_source(&mut self, name: &str) -> OpId {
        let id = self.next_op();
        self.submitted.push(Submitted::Lookup {
            id,
            name: name.to_string(),
        });
        id
    }

    fn load_module(&mut self, module: &str, args: &str) -> OpId {
        let id = self.next_op();
        self.submitted.push(Submitted::LoadModule {
            id,
            module: module.to_string(),
            args: args.to_string(),
        });
        id
    }

    fn set_source_mute(&mut self, name: &str, mute: bool) -> OpId {
        let id = self.next_op();
        self.submitted.push(Submitted::SetMute {
            id,
            name: name.to_string(),
            mute,
        });
        id
    }

    fn subscribe_sources(&mut self) -> OpId {
        let id = self.next_op();
        self.submitted.push(Submitted::Subscribe { id });
        id
    }

    fn connect_record(&mut self, device: &str, spec: SampleSpec) -> Result<(), ServerError> {
        if let Some(message) = self.fail_connect_record.take() {
            return Err(ServerError::Failure(message));
        }
        self.submitted.push(Submitted::ConnectRecord {
            device: device.to_string(),
            spec,
        });
        Ok(())
    }

    fn disconnect(&mut self) {
        self.submitted.push(Submitted::Disconnect);
    }
}
