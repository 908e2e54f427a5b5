// SPDX-License-Identifier: GPL-3.0-or-later
// Copyright (c) 2024 Takashi Sakamoto

use {
    super::{handshake::*, incoming::*, resync::*, suppression::*, transport::*, *},
    std::{
        sync::mpsc,
        thread::JoinHandle,
        time::{Duration, Instant},
    },
};

/// The parameters to open MIDI link to the amplifier.
#[derive(Debug, Clone)]
pub struct LinkParams {
    pub input: String,
    pub output: String,
    pub channel: MidiChannel,
    pub pacing: Duration,
    /// None disables the watchdog for stuck flags.
    pub suppression_timeout: Option<Duration>,
}

/// The command to the panel which displays the state of amplifier.
#[derive(Debug, Clone, PartialEq)]
pub enum PanelCommand {
    Refresh {
        name: &'static str,
        value: ParamValue,
    },
    /// Whether the panel should refuse user operation.
    Busy(bool),
    Status(String),
    Show(Vec<(&'static str, ParamValue)>),
}

/// The control model of amplifier, which joins outbound and inbound path of the protocol.
pub struct DtModel {
    registry: Registry,
    state: ParameterState,
    outlet: Outlet,
    suppressor: EchoSuppressor,
    sequencer: Sequencer,
    dispatcher: IncomingDispatcher,
    handshake: IdentificationHandshake,
    panel: mpsc::Sender<PanelCommand>,
    workers: Vec<JoinHandle<Result<(), Error>>>,
}

impl std::fmt::Debug for DtModel {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("DtModel")
            .field("outlet", &self.outlet)
            .field("dispatcher", &self.dispatcher)
            .field("info", self.handshake.info())
            .field("resync", &self.sequencer.token().is_held())
            .field("workers", &self.workers.len())
            .finish()
    }
}

impl DtModel {
    pub fn new(params: &LinkParams, outlet: Outlet, panel: mpsc::Sender<PanelCommand>) -> Self {
        Self {
            registry: Default::default(),
            state: Default::default(),
            suppressor: EchoSuppressor::new(params.channel, outlet.clone()),
            sequencer: Sequencer::new(params.channel, outlet.clone(), params.pacing),
            dispatcher: IncomingDispatcher::new(params.channel, params.suppression_timeout),
            handshake: Default::default(),
            outlet,
            panel,
            workers: Default::default(),
        }
    }

    pub fn outlet(&self) -> &Outlet {
        &self.outlet
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn state(&self) -> &ParameterState {
        &self.state
    }

    pub fn info(&self) -> &ConnectionInfo {
        self.handshake.info()
    }

    fn notify(&self, cmd: PanelCommand) {
        if self.panel.send(cmd).is_err() {
            debug!("panel is already closed");
        }
    }

    fn refresh(&self, desc: &ParameterDescriptor, value: ParamValue) {
        self.notify(PanelCommand::Refresh {
            name: desc.name,
            value,
        });
    }

    /// Start the session just after the outlet is attached.
    pub fn connected(&mut self) -> Result<(), Error> {
        let _enter = debug_span!("identify").entered();

        self.dispatcher.reset();
        self.state.clear();
        let res = self.handshake.start(&self.outlet);
        debug!(?res);
        self.notify(PanelCommand::Status(self.handshake.info().status()));
        res
    }

    pub fn disconnected(&mut self) {
        self.outlet.detach();
        self.dispatcher.reset();
        self.state.clear();
        self.handshake.reset();
        self.notify(PanelCommand::Status(self.info().status()));
    }

    /// Write the value to the parameter. The local state and panel are updated before sending.
    /// Return false when the write is dropped since the other sender holds outbound path.
    pub fn write(&mut self, id: u8, value: &ParamValue) -> Result<bool, Error> {
        let desc = match self.registry.lookup(id) {
            Some(desc) => *desc,
            None => {
                let msg = format!("Parameter is not writable: {}", id);
                return Err(Error::new(FileError::Inval, &msg));
            }
        };

        if desc.role == ParamRole::AmpWithDefaults {
            let index = match desc.domain.clip(value) {
                ParamValue::Index(index) => index,
                _ => 0,
            };
            return self.load_amp_defaults(desc.channel, index).map(|_| true);
        }

        let (value, _) = self.state.update(&desc, value);
        self.refresh(&desc, value);

        let sent = self.suppressor.write(desc.id, desc.domain.encode(&value))?;
        if !sent {
            debug!(name = desc.name, "write is dropped while outbound path is held");
        } else if desc.role == ParamRole::VoiceSelect {
            // The amplifier rewrites the dependent parameters.
            self.spawn_resync();
        }
        Ok(sent)
    }

    pub fn write_by_name(&mut self, name: &str, text: &str) -> Result<bool, Error> {
        let desc = match self.registry.find(name) {
            Some(desc) => *desc,
            None => {
                let msg = format!("Parameter is not found: {}", name);
                return Err(Error::new(FileError::Inval, &msg));
            }
        };
        let value = desc.domain.parse(text)?;
        self.write(desc.id, &value)
    }

    /// Change amp model together with the defaults of power amp, then pull the parameters
    /// rewritten by the amplifier.
    pub fn load_amp_defaults(&mut self, channel: AmpChannel, amp_index: u8) -> Result<(), Error> {
        let (with_defaults, plain) = match (
            self.registry.amp_with_defaults(channel),
            self.registry.amp_model(channel),
        ) {
            (Some(with_defaults), Some(plain)) => (*with_defaults, *plain),
            _ => {
                let msg = format!("Amp model is not available for {:?} channel", channel);
                return Err(Error::new(FileError::Inval, &msg));
            }
        };

        let (value, _) = self.state.update(&plain, &ParamValue::Index(amp_index));
        self.refresh(&plain, value);

        let sent = self
            .suppressor
            .write(with_defaults.id, with_defaults.domain.encode(&value))?;
        debug!(?channel, %value, sent, "amp model with defaults");

        POWER_AMP_RESET
            .entries(channel)
            .into_iter()
            .for_each(|(id, state)| {
                if let Some(desc) = self.registry.lookup(id).copied() {
                    let (value, changed) = self.state.update(&desc, &ParamValue::Switch(state));
                    if changed {
                        self.refresh(&desc, value);
                    }
                }
            });

        self.resync().map(|_| ())
    }

    /// Pull the whole parameters, blocking the caller. Return false when the other resync is
    /// running.
    pub fn resync(&mut self) -> Result<bool, Error> {
        let panel = self.panel.clone();
        self.sequencer.resync(|busy| {
            let _ = panel.send(PanelCommand::Busy(busy));
        })
    }

    fn spawn_resync(&mut self) {
        self.reap_workers();
        match self.sequencer.spawn() {
            Ok(Some(worker)) => self.workers.push(worker),
            Ok(None) => (),
            Err(e) => warn!("{}", e),
        }
    }

    /// Handle inbound datagram in the control context.
    pub fn handle_datagram(&mut self, raw: &[u8], now: Instant) -> Dispatched {
        let outcome = self.dispatcher.dispatch(
            raw,
            now,
            &self.registry,
            &mut self.state,
            &mut self.handshake,
        );
        debug!(datagram = ?raw, ?outcome);

        match outcome {
            Dispatched::Applied {
                desc,
                value,
                changed,
                cascade,
            } => {
                if changed {
                    self.refresh(&desc, value);
                }
                if cascade {
                    self.spawn_resync();
                }
            }
            Dispatched::Identified => {
                self.notify(PanelCommand::Status(self.handshake.info().status()));
            }
            _ => (),
        }

        outcome
    }

    pub fn check_timers(&mut self, now: Instant) {
        self.dispatcher.expire(now);
        self.reap_workers();
    }

    fn reap_workers(&mut self) {
        let (finished, running): (Vec<_>, Vec<_>) = self
            .workers
            .drain(..)
            .partition(|worker| worker.is_finished());
        self.workers = running;
        finished.into_iter().for_each(join_worker);
    }

    /// Wait for the running workers.
    pub fn join_workers(&mut self) {
        self.workers.drain(..).for_each(join_worker);
    }

    pub fn show(&self) {
        let entries = self
            .state()
            .known(self.registry())
            .map(|(desc, value)| (desc.name, value))
            .collect();
        self.notify(PanelCommand::Show(entries));
    }

    pub fn status(&self) {
        debug!(
            blocked = self.dispatcher.is_blocked(),
            receiving = self.dispatcher.is_receiving(),
            resync = self.sequencer.token().is_held(),
            workers = self.workers.len(),
            "status"
        );
        self.notify(PanelCommand::Status(self.info().status()));
    }
}

fn join_worker(worker: JoinHandle<Result<(), Error>>) {
    match worker.join() {
        Ok(Ok(())) => (),
        // Already reported by the worker.
        Ok(Err(_)) => (),
        Err(_) => warn!("resync worker panicked"),
    }
}

#[cfg(test)]
mod test {
    use {
        super::{super::transport::test::Recorder, *},
        std::{
            collections::VecDeque,
            sync::{Arc, Mutex},
        },
    };

    fn params() -> LinkParams {
        LinkParams {
            input: "DT50 MIDI 1".to_string(),
            output: "DT50 MIDI 1".to_string(),
            channel: MidiChannel::default(),
            pacing: Duration::from_millis(1),
            suppression_timeout: None,
        }
    }

    fn model_with_recorder() -> (DtModel, Recorder, mpsc::Receiver<PanelCommand>) {
        let outlet = Outlet::default();
        let recorder = Recorder::default();
        outlet.attach(Box::new(recorder.clone())).unwrap();
        let (tx, rx) = mpsc::channel();
        (DtModel::new(&params(), outlet, tx), recorder, rx)
    }

    #[test]
    fn echo_of_write_is_suppressed() {
        let (mut model, recorder, rx) = model_with_recorder();

        assert_eq!(model.write(13, &ParamValue::Level(1.0)).unwrap(), true);
        let sent = recorder.datagrams();
        assert_eq!(
            sent,
            vec![vec![0xb0, 127, 127], vec![0xb0, 13, 127], vec![0xb0, 127, 0]]
        );
        assert_eq!(
            rx.try_recv().unwrap(),
            PanelCommand::Refresh {
                name: "gain-a",
                value: ParamValue::Level(1.0)
            }
        );

        let now = Instant::now();
        sent.iter().for_each(|raw| {
            model.handle_datagram(raw, now);
        });

        assert_eq!(recorder.datagrams().len(), 3);
        assert!(rx.try_recv().is_err());
        assert!(model.workers.is_empty());
        assert_eq!(model.state().get(13), Some(ParamValue::Level(1.0)));
    }

    #[test]
    fn write_out_of_domain() {
        let (mut model, recorder, _rx) = model_with_recorder();

        assert_eq!(model.write(13, &ParamValue::Level(1.5)).unwrap(), true);
        assert_eq!(recorder.datagrams()[1], vec![0xb0, 13, 127]);
        assert_eq!(model.state().get(13), Some(ParamValue::Level(1.0)));

        let err = model.write(BLOCK_PARAM_ID, &ParamValue::Switch(true)).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Inval));
        let err = model.write_by_name("gain-c", "0.5").unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Inval));
        let err = model.write_by_name("reverb-a", "maybe").unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Inval));
        assert_eq!(recorder.datagrams().len(), 3);

        assert_eq!(model.write_by_name("low-volume", "on").unwrap(), true);
        assert_eq!(recorder.datagrams()[4], vec![0xb0, 81, 127]);
    }

    #[test]
    fn write_without_link() {
        let (tx, _rx) = mpsc::channel();
        let mut model = DtModel::new(&params(), Outlet::default(), tx);
        let err = model.write(13, &ParamValue::Level(0.5)).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Nodev));
        assert_eq!(model.state().get(13), Some(ParamValue::Level(0.5)));
    }

    fn resync_count(datagrams: &[Vec<u8>]) -> usize {
        datagrams
            .iter()
            .filter(|d| d[..] == [0xb0, 126, 127])
            .count()
    }

    #[test]
    fn voice_change_by_amplifier() {
        let (mut model, recorder, _rx) = model_with_recorder();
        let now = Instant::now();

        let outcome = model.handle_datagram(&[0xb0, 22, 2], now);
        assert!(matches!(outcome, Dispatched::Applied { cascade: true, .. }));
        model.join_workers();

        let sent = recorder.datagrams();
        assert_eq!(sent.len(), 14);
        assert_eq!(resync_count(&sent), 1);
        assert!(!model.sequencer.token().is_held());
    }

    #[test]
    fn voice_change_while_receiving() {
        let (mut model, recorder, _rx) = model_with_recorder();
        let now = Instant::now();

        model.handle_datagram(&[0xb0, 126, 127], now);
        let outcome = model.handle_datagram(&[0xb0, 62, 3], now);
        assert!(matches!(outcome, Dispatched::Applied { cascade: false, .. }));
        model.join_workers();
        assert!(recorder.datagrams().is_empty());
    }

    #[test]
    fn voice_change_by_user() {
        let (mut model, recorder, _rx) = model_with_recorder();

        assert!(model.write_by_name("voice-a", "1").unwrap());
        model.join_workers();

        let sent = recorder.datagrams();
        assert_eq!(&sent[..3], &[vec![0xb0, 127, 127], vec![0xb0, 22, 1], vec![0xb0, 127, 0]]);
        assert_eq!(sent.len(), 17);
        assert_eq!(resync_count(&sent), 1);
    }

    #[test]
    fn connection_lifecycle() {
        let (mut model, recorder, rx) = model_with_recorder();

        let now = Instant::now();
        model.handle_datagram(&[0xb0, 14, 64], now);
        model.handle_datagram(&[0xb0, 127, 127], now);
        model.handle_datagram(&[0xb0, 126, 127], now);
        assert!(model.dispatcher.is_blocked());
        assert!(model.dispatcher.is_receiving());

        model.connected().unwrap();
        assert_eq!(recorder.datagrams(), vec![vec![0xf0, 0x7e, 0x7f, 0x06, 0x01, 0xf7]]);
        assert_eq!(model.state().get(14), None);
        assert!(!model.dispatcher.is_blocked());
        assert!(!model.dispatcher.is_receiving());
        assert!(matches!(
            model.handle_datagram(&[0xb0, 13, 100], now),
            Dispatched::Applied { .. }
        ));

        let frame = [
            0xf0, 0x7e, 0x7f, 0x06, 0x02, 0x00, 0x01, 0x0c, 0x15, 0x00, 0x04, 0x00, 0x20, 0x32,
            0x2e, 0x31, 0x30, 0xf7,
        ];
        assert_eq!(model.handle_datagram(&frame, Instant::now()), Dispatched::Identified);
        assert_eq!(model.info().status(), "DT50 212 v2.10");

        model.handle_datagram(&[0xb0, 127, 127], now);
        model.handle_datagram(&[0xb0, 126, 127], now);

        model.disconnected();
        assert!(!model.outlet().is_attached());
        assert_eq!(model.info().status(), "not connected");
        assert!(!model.dispatcher.is_blocked());
        assert!(!model.dispatcher.is_receiving());
        assert!(matches!(
            model.handle_datagram(&[0xb0, 13, 100], now),
            Dispatched::Applied { changed: true, .. }
        ));

        let statuses: Vec<PanelCommand> = rx
            .try_iter()
            .filter(|cmd| matches!(cmd, PanelCommand::Status(_)))
            .collect();
        assert_eq!(
            statuses,
            vec![
                PanelCommand::Status("not connected".to_string()),
                PanelCommand::Status("DT50 212 v2.10".to_string()),
                PanelCommand::Status("not connected".to_string()),
            ]
        );
    }

    /// The amplifier which echoes every datagram, then answers dump request for the first
    /// group with the parameters it holds.
    #[derive(Clone, Default)]
    struct SimulatedAmplifier {
        values: Arc<Mutex<Vec<(u8, u8)>>>,
        inbound: Arc<Mutex<VecDeque<Vec<u8>>>>,
    }

    const AMP_DEFAULTS_A: u8 = 35;

    impl SimulatedAmplifier {
        fn store(&self, id: u8, raw: u8) {
            let mut values = self.values.lock().unwrap();
            match values.iter_mut().find(|(i, _)| *i == id) {
                Some(entry) => entry.1 = raw,
                None => values.push((id, raw)),
            }
        }

        fn pop(&self) -> Option<Vec<u8>> {
            self.inbound.lock().unwrap().pop_front()
        }
    }

    impl DatagramSink for SimulatedAmplifier {
        fn send(&mut self, datagram: &[u8]) -> Result<(), Error> {
            self.inbound.lock().unwrap().push_back(datagram.to_vec());

            if datagram.len() == 3 && datagram[0] == 0xb0 {
                match datagram[1] {
                    AMP_DEFAULTS_A => {
                        self.store(11, datagram[2]);
                        POWER_AMP_RESET
                            .entries(AmpChannel::A)
                            .into_iter()
                            .for_each(|(id, state)| self.store(id, if state { 127 } else { 0 }));
                    }
                    DUMP_REQUEST_PARAM_ID if datagram[2] == 0 => {
                        let values = self.values.lock().unwrap().clone();
                        let mut inbound = self.inbound.lock().unwrap();
                        values
                            .into_iter()
                            .for_each(|(id, raw)| inbound.push_back(vec![0xb0, id, raw]));
                    }
                    BLOCK_PARAM_ID | RECEIVING_PARAM_ID | DUMP_REQUEST_PARAM_ID => (),
                    id => self.store(id, datagram[2]),
                }
            }
            Ok(())
        }
    }

    fn drain(model: &mut DtModel, amp: &SimulatedAmplifier) -> Vec<Dispatched> {
        let mut outcomes = Vec::new();
        while let Some(raw) = amp.pop() {
            outcomes.push(model.handle_datagram(&raw, Instant::now()));
        }
        outcomes
    }

    fn switch(model: &DtModel, name: &str) -> Option<ParamValue> {
        let id = model.registry().find(name).unwrap().id;
        model.state().get(id)
    }

    #[test]
    fn amp_model_with_defaults() {
        let amp = SimulatedAmplifier::default();
        [(11, 5), (22, 1), (29, 127), (30, 127), (32, 127), (33, 0), (34, 127), (13, 90)]
            .iter()
            .for_each(|&(id, raw)| amp.store(id, raw));

        let outlet = Outlet::default();
        outlet.attach(Box::new(amp.clone())).unwrap();
        let (tx, _rx) = mpsc::channel();
        let mut model = DtModel::new(&params(), outlet, tx);

        assert!(model.resync().unwrap());
        let outcomes = drain(&mut model, &amp);
        assert!(outcomes
            .iter()
            .all(|o| !matches!(o, Dispatched::Applied { cascade: true, .. })));
        assert_eq!(switch(&model, "class-a-a"), Some(ParamValue::Switch(true)));
        assert_eq!(switch(&model, "voice-a"), Some(ParamValue::Index(1)));

        model.load_amp_defaults(AmpChannel::A, 7).unwrap();
        let outcomes = drain(&mut model, &amp);
        assert!(outcomes
            .iter()
            .all(|o| !matches!(o, Dispatched::Applied { cascade: true, .. })));
        assert!(outcomes.contains(&Dispatched::Suppressed));
        assert!(model.workers.is_empty());

        assert_eq!(switch(&model, "amp-a"), Some(ParamValue::Index(7)));
        let reset = POWER_AMP_RESET.entries(AmpChannel::A);
        assert_eq!(reset.len(), 5);
        reset.iter().for_each(|&(id, state)| {
            assert_eq!(model.state().get(id), Some(ParamValue::Switch(state)));
        });
        assert!(!model.dispatcher.is_blocked());
        assert!(!model.dispatcher.is_receiving());

        let err = model.load_amp_defaults(AmpChannel::Master, 0).unwrap_err();
        assert_eq!(err.kind::<FileError>(), Some(FileError::Inval));
    }
}
