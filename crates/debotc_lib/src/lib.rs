//! Decompiler for Zandronum compiled bot scripts (BOTC object files).
//!
//! The input is a flat little-endian stream of 32-bit records describing
//! states, event handlers and a stack VM program. [`parse`] recovers the
//! structural form, [`decompile`] lifts each event body through a graph
//! rewriting pipeline back to BOTC source text, and [`disassemble_to`]
//! writes a raw listing one record per line.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::io::Write;

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use thiserror::Error;

mod graph;
mod rewrite;
mod tables;

pub use tables::{
    BOT_COMMANDS, BOT_EVENTS, BotCommandInfo, MAX_NUM_EVENTS, MAX_NUM_GLOBAL_EVENTS,
    NUM_BOT_COMMANDS, NUM_DATA_HEADERS, Opcode, ReturnKind,
};

use graph::{
    Arg, Channel, Effects, Graph, LitReturn, NodeId, NodeKind, OpReturn, Piece, RenderRule,
    consumes_normal_stack, string_stack_arg,
};

#[derive(Debug, Error)]
pub enum DecompileError {
    #[error("read past end of input at offset {offset}")]
    OutOfBounds { offset: usize },
    #[error("invalid UTF-8 in string at offset {offset}")]
    InvalidUtf8 { offset: usize },
    #[error("unknown opcode {value} at offset {offset}")]
    MalformedOpcode { value: i32, offset: usize },
    #[error("unknown bot command {value} at offset {offset}")]
    UnknownBotCommand { value: i32, offset: usize },
    #[error("bot command {command} declares {declared} argument(s), expected {expected}")]
    ArgCountMismatch {
        command: &'static str,
        declared: i32,
        expected: i32,
    },
    #[error("malformed state header: {reason}")]
    BadStateHeader { reason: String },
    #[error("unknown bot event type {value} at offset {offset}")]
    BadEventType { value: i32, offset: usize },
    #[error("string index {index} out of range at offset {offset}")]
    BadStringIndex { index: i32, offset: usize },
    #[error("duplicate string table")]
    DuplicateStringTable,
    #[error("missing state with index {index}")]
    MissingState { index: i32 },
    #[error("too many events in state {state:?}")]
    TooManyEvents { state: String },
    #[error("world event handler outside of a named state")]
    EventOutsideState,
    #[error("unexpected command outside any event at offset {offset}")]
    UnexpectedCommandOutsideEvent { offset: usize },
    #[error("jump to offset {offset} does not land on a command boundary")]
    DanglingLabel { offset: i32 },
    #[error("switch block is not terminated by a stack drop")]
    MalformedSwitch,
    #[error("internal decompiler error: {0}")]
    Internal(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Output form produced by [`decompile_with_mode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecompileMode {
    Script,
    Disasm,
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(buf: &'a [u8]) -> Reader<'a> {
        Reader { buf, pos: 0 }
    }

    fn offset(&self) -> usize {
        self.pos
    }

    fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    fn read_i32(&mut self) -> Result<i32, DecompileError> {
        if self.remaining() < 4 {
            return Err(DecompileError::OutOfBounds { offset: self.pos });
        }
        let value = LittleEndian::read_i32(&self.buf[self.pos..self.pos + 4]);
        self.pos += 4;
        Ok(value)
    }

    fn read_string(&mut self, len: i32) -> Result<String, DecompileError> {
        let len = usize::try_from(len)
            .map_err(|_| DecompileError::OutOfBounds { offset: self.pos })?;
        if self.remaining() < len {
            return Err(DecompileError::OutOfBounds { offset: self.pos });
        }
        let text = std::str::from_utf8(&self.buf[self.pos..self.pos + len])
            .map_err(|_| DecompileError::InvalidUtf8 { offset: self.pos })?
            .to_string();
        self.pos += len;
        Ok(text)
    }
}

/// A single VM record inside an event body.
#[derive(Debug, Clone, Serialize)]
pub struct Command {
    pub position_before: usize,
    pub position_after: usize,
    pub opcode: Opcode,
    pub args: Vec<i32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum EventKind {
    /// Scripted `event "<name>"` handler.
    Bot { event_type: usize },
    /// `onenter` / `mainloop` / `onexit` handler of a named state.
    World { header: Opcode },
}

#[derive(Debug, Clone, Serialize)]
pub struct Event {
    pub kind: EventKind,
    pub commands: Vec<Command>,
    pub var_count: i32,
    #[serde(skip)]
    finalized: bool,
}

impl Event {
    fn new(kind: EventKind) -> Event {
        Event {
            kind,
            commands: Vec::new(),
            var_count: 0,
            finalized: false,
        }
    }

    /// The handler title as it appears in BOTC source.
    pub fn title(&self) -> String {
        match self.kind {
            EventKind::World { header } => {
                header.name().trim_start_matches("DH_").to_ascii_lowercase()
            }
            EventKind::Bot { event_type } => format!("event \"{}\"", BOT_EVENTS[event_type]),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct State {
    pub name: String,
    pub index: i32,
    pub events: Vec<Event>,
}

impl State {
    pub fn is_global(&self) -> bool {
        self.index == -1
    }
}

/// Structural form of a compiled bot script.
#[derive(Debug, Clone, Serialize)]
pub struct ParsedScript {
    pub states: Vec<State>,
    pub strings: Vec<String>,
    #[serde(skip)]
    label_positions: HashSet<i32>,
}

struct Parser<'a> {
    r: Reader<'a>,
    states: Vec<State>,
    strings: Vec<String>,
    have_strings: bool,
    label_positions: HashSet<i32>,
    disasm: Option<&'a mut dyn Write>,
}

impl<'a> Parser<'a> {
    fn new(data: &'a [u8], disasm: Option<&'a mut dyn Write>) -> Parser<'a> {
        Parser {
            r: Reader::new(data),
            // the global state is implicit and holds scripted events only
            states: vec![State {
                name: String::new(),
                index: -1,
                events: Vec::new(),
            }],
            strings: Vec::new(),
            have_strings: false,
            label_positions: HashSet::new(),
            disasm,
        }
    }

    fn run(&mut self) -> Result<(), DecompileError> {
        while self.r.remaining() > 0 {
            let pos = self.r.offset();
            let value = self.r.read_i32()?;
            let opcode = Opcode::from_index(value)
                .ok_or(DecompileError::MalformedOpcode { value, offset: pos })?;
            self.parse_record(pos, opcode)?;
        }
        Ok(())
    }

    fn parse_record(&mut self, pos: usize, opcode: Opcode) -> Result<(), DecompileError> {
        match opcode {
            Opcode::Command => self.parse_bot_command(pos),
            Opcode::StateName => self.parse_state_name(pos),
            Opcode::StateIdx => Err(DecompileError::BadStateHeader {
                reason: "state index without a preceding state name".to_string(),
            }),
            Opcode::OnEnter | Opcode::MainLoop | Opcode::OnExit => {
                self.parse_world_handler(pos, opcode)
            }
            Opcode::Event => self.parse_bot_event(pos),
            Opcode::EndOnEnter | Opcode::EndMainLoop | Opcode::EndOnExit | Opcode::EndEvent => {
                self.current_event_mut(pos)?.finalized = true;
                self.emit_disasm_line(pos, opcode, &[], "}")
            }
            Opcode::ScriptVarList => {
                let count = self.r.read_i32()?;
                self.current_event_mut(pos)?.var_count = count;
                let readable = format!("declares {count} local variable(s)");
                self.emit_disasm_line(pos, opcode, &[count], &readable)
            }
            Opcode::StringList => self.parse_string_list(pos),
            Opcode::IfGoto | Opcode::IfNotGoto | Opcode::Goto => {
                self.parse_command(pos, opcode, 1, true)
            }
            Opcode::CaseGoto => self.parse_command(pos, opcode, 2, true),
            Opcode::PushNumber
            | Opcode::PushStringIndex
            | Opcode::PushGlobalVar
            | Opcode::PushLocalVar
            | Opcode::PushGlobalArray
            | Opcode::IncGlobalVar
            | Opcode::DecGlobalVar
            | Opcode::AssignGlobalVar
            | Opcode::AddGlobalVar
            | Opcode::SubGlobalVar
            | Opcode::MulGlobalVar
            | Opcode::DivGlobalVar
            | Opcode::ModGlobalVar
            | Opcode::IncLocalVar
            | Opcode::DecLocalVar
            | Opcode::AssignLocalVar
            | Opcode::AddLocalVar
            | Opcode::SubLocalVar
            | Opcode::MulLocalVar
            | Opcode::DivLocalVar
            | Opcode::ModLocalVar
            | Opcode::IncGlobalArray
            | Opcode::DecGlobalArray
            | Opcode::AssignGlobalArray
            | Opcode::AddGlobalArray
            | Opcode::SubGlobalArray
            | Opcode::MulGlobalArray
            | Opcode::DivGlobalArray
            | Opcode::ModGlobalArray => self.parse_command(pos, opcode, 1, false),
            _ => self.parse_command(pos, opcode, 0, false),
        }
    }

    fn parse_command(
        &mut self,
        pos: usize,
        opcode: Opcode,
        num_args: usize,
        is_jump: bool,
    ) -> Result<(), DecompileError> {
        let mut args = Vec::with_capacity(num_args);
        for _ in 0..num_args {
            args.push(self.r.read_i32()?);
        }
        if is_jump {
            // the jump target is always the last raw argument
            self.label_positions.insert(*args.last().unwrap());
        }
        let cmd = Command {
            position_before: pos,
            position_after: self.r.offset(),
            opcode,
            args,
        };
        let readable = describe_readable(&cmd, &self.strings);
        self.emit_disasm_line(pos, opcode, &cmd.args, &readable)?;
        self.current_event_mut(pos)?.commands.push(cmd);
        Ok(())
    }

    fn parse_bot_command(&mut self, pos: usize) -> Result<(), DecompileError> {
        let index = self.r.read_i32()?;
        let declared = self.r.read_i32()?;
        if usize::try_from(index)
            .ok()
            .and_then(|i| BOT_COMMANDS.get(i))
            .is_none()
        {
            return Err(DecompileError::UnknownBotCommand {
                value: index,
                offset: pos,
            });
        }
        let cmd = Command {
            position_before: pos,
            position_after: self.r.offset(),
            opcode: Opcode::Command,
            args: vec![index, declared],
        };
        let readable = describe_readable(&cmd, &self.strings);
        self.emit_disasm_line(pos, Opcode::Command, &[index, declared], &readable)?;
        self.current_event_mut(pos)?.commands.push(cmd);
        Ok(())
    }

    fn parse_state_name(&mut self, pos: usize) -> Result<(), DecompileError> {
        let len = self.r.read_i32()?;
        let name = self.r.read_string(len)?;
        let header = self.r.read_i32()?;
        if Opcode::from_index(header) != Some(Opcode::StateIdx) {
            return Err(DecompileError::BadStateHeader {
                reason: format!("expected a state index after state name {name:?}"),
            });
        }
        let index = self.r.read_i32()?;
        if index < 0 {
            return Err(DecompileError::BadStateHeader {
                reason: format!("state {name:?} has negative index {index}"),
            });
        }
        let readable = format!("state \"{name}\": // {index}");
        self.emit_disasm_line(pos, Opcode::StateName, &[len], &readable)?;
        self.states.push(State {
            name,
            index,
            events: Vec::new(),
        });
        Ok(())
    }

    fn parse_world_handler(&mut self, pos: usize, opcode: Opcode) -> Result<(), DecompileError> {
        let state = self.states.last_mut().unwrap();
        if state.is_global() {
            return Err(DecompileError::EventOutsideState);
        }
        if state.events.len() >= MAX_NUM_EVENTS {
            return Err(DecompileError::TooManyEvents {
                state: state.name.clone(),
            });
        }
        let event = Event::new(EventKind::World { header: opcode });
        let readable = format!("{} {{", event.title());
        state.events.push(event);
        self.emit_disasm_line(pos, opcode, &[], &readable)
    }

    fn parse_bot_event(&mut self, pos: usize) -> Result<(), DecompileError> {
        let value = self.r.read_i32()?;
        let event_type = usize::try_from(value)
            .ok()
            .filter(|&i| i < BOT_EVENTS.len())
            .ok_or(DecompileError::BadEventType { value, offset: pos })?;
        let state = self.states.last_mut().unwrap();
        let cap = if state.is_global() {
            MAX_NUM_GLOBAL_EVENTS
        } else {
            MAX_NUM_EVENTS
        };
        if state.events.len() >= cap {
            return Err(DecompileError::TooManyEvents {
                state: state.name.clone(),
            });
        }
        state.events.push(Event::new(EventKind::Bot { event_type }));
        let readable = format!("event \"{}\" {{", BOT_EVENTS[event_type]);
        self.emit_disasm_line(pos, Opcode::Event, &[value], &readable)
    }

    fn parse_string_list(&mut self, pos: usize) -> Result<(), DecompileError> {
        if self.have_strings {
            return Err(DecompileError::DuplicateStringTable);
        }
        self.have_strings = true;
        let count = self.r.read_i32()?;
        for _ in 0..count {
            let len = self.r.read_i32()?;
            let text = self.r.read_string(len)?;
            self.strings.push(text);
        }
        let readable = format!("string table with {count} string(s)");
        self.emit_disasm_line(pos, Opcode::StringList, &[count], &readable)
    }

    fn current_event_mut(&mut self, pos: usize) -> Result<&mut Event, DecompileError> {
        let state = self.states.last_mut().unwrap();
        match state.events.last_mut() {
            Some(event) if !event.finalized => Ok(event),
            _ => Err(DecompileError::UnexpectedCommandOutsideEvent { offset: pos }),
        }
    }

    fn emit_disasm_line(
        &mut self,
        pos: usize,
        opcode: Opcode,
        args: &[i32],
        readable: &str,
    ) -> Result<(), DecompileError> {
        if let Some(out) = self.disasm.as_deref_mut() {
            let mut head = opcode.name().to_string();
            if !args.is_empty() {
                let rendered: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                head.push(' ');
                head.push_str(&rendered.join(", "));
            }
            writeln!(out, "{pos:08X} | {head:<44} | {readable}")?;
        }
        Ok(())
    }

    /// Orders states by index and checks they form `-1, 0, 1, ...`.
    fn into_script(mut self) -> Result<ParsedScript, DecompileError> {
        self.states.sort_by_key(|s| s.index);
        for (i, state) in self.states.iter().enumerate() {
            let expected = i as i32 - 1;
            if state.index != expected {
                return Err(DecompileError::MissingState { index: expected });
            }
        }
        Ok(ParsedScript {
            states: self.states,
            strings: self.strings,
            label_positions: self.label_positions,
        })
    }
}

fn operator_info(opcode: Opcode) -> Option<(&'static str, usize)> {
    Some(match opcode {
        Opcode::OrLogical => ("||", 2),
        Opcode::AndLogical => ("&&", 2),
        Opcode::OrBitwise => ("|", 2),
        Opcode::EorBitwise => ("^", 2),
        Opcode::AndBitwise => ("&", 2),
        Opcode::Equals => ("==", 2),
        Opcode::NotEquals => ("!=", 2),
        Opcode::LessThan => ("<", 2),
        Opcode::LessThanEquals => ("<=", 2),
        Opcode::GreaterThan => (">", 2),
        Opcode::GreaterThanEquals => (">=", 2),
        Opcode::NegateLogical => ("!", 1),
        Opcode::LShift => ("<<", 2),
        Opcode::RShift => (">>", 2),
        Opcode::Add => ("+", 2),
        Opcode::Subtract => ("-", 2),
        Opcode::UnaryMinus => ("-", 1),
        Opcode::Multiply => ("*", 2),
        Opcode::Divide => ("/", 2),
        Opcode::Modulus => ("%", 2),
        _ => return None,
    })
}

fn assign_symbol(opcode: Opcode) -> &'static str {
    match opcode {
        Opcode::AssignGlobalVar | Opcode::AssignLocalVar | Opcode::AssignGlobalArray => "=",
        Opcode::AddGlobalVar | Opcode::AddLocalVar | Opcode::AddGlobalArray => "+=",
        Opcode::SubGlobalVar | Opcode::SubLocalVar | Opcode::SubGlobalArray => "-=",
        Opcode::MulGlobalVar | Opcode::MulLocalVar | Opcode::MulGlobalArray => "*=",
        Opcode::DivGlobalVar | Opcode::DivLocalVar | Opcode::DivGlobalArray => "/=",
        _ => "%=",
    }
}

/// Referenced-variable sets and lookahead state threaded through node
/// construction for one event.
struct BuildCtx<'a> {
    strings: &'a [String],
    globals: &'a mut BTreeSet<i32>,
    global_arrays: &'a mut BTreeSet<i32>,
    state_vars: &'a mut BTreeSet<i32>,
    previous: Option<Opcode>,
}

fn create_node(
    g: &mut Graph,
    cmd: &Command,
    ctx: &mut BuildCtx<'_>,
) -> Result<NodeId, DecompileError> {
    if let Some((symbol, arity)) = operator_info(cmd.opcode) {
        let rule = if arity == 1 {
            RenderRule::Prefix(symbol)
        } else {
            RenderRule::Infix(symbol)
        };
        return Ok(g.add(NodeKind::StackOp {
            args: consumes_normal_stack(arity),
            returns: vec![OpReturn::new(Channel::Normal, rule)],
            effects: Effects::default(),
        }));
    }
    let node = match cmd.opcode {
        Opcode::Command => {
            let index = cmd.args[0] as usize;
            let declared = cmd.args[1];
            let info = &BOT_COMMANDS[index];
            let expected = (info.num_args + info.num_string_args) as i32;
            if declared != expected {
                return Err(DecompileError::ArgCountMismatch {
                    command: info.name,
                    declared,
                    expected,
                });
            }
            let mut args = consumes_normal_stack(info.num_args);
            for depth in (0..info.num_string_args).rev() {
                args.push(string_stack_arg(depth));
            }
            let channel = match info.ret {
                ReturnKind::Void => Channel::None,
                ReturnKind::Int | ReturnKind::Bool => Channel::Normal,
                ReturnKind::Str => Channel::Str,
            };
            g.add(NodeKind::StackOp {
                args,
                returns: vec![OpReturn::new(
                    channel,
                    RenderRule::Call(info.name.to_string()),
                )],
                effects: Effects::effectful(),
            })
        }
        Opcode::PushNumber => g.add(NodeKind::Literal(vec![LitReturn::new(
            cmd.args[0].to_string(),
            Channel::Normal,
        )])),
        Opcode::PushStringIndex => {
            let index = cmd.args[0];
            let text = usize::try_from(index)
                .ok()
                .and_then(|i| ctx.strings.get(i))
                .ok_or(DecompileError::BadStringIndex {
                    index,
                    offset: cmd.position_before,
                })?;
            g.add(NodeKind::Literal(vec![LitReturn::new(
                format!("\"{text}\""),
                Channel::Str,
            )]))
        }
        Opcode::PushGlobalVar => {
            let n = cmd.args[0];
            ctx.globals.insert(n);
            g.add(NodeKind::Literal(vec![LitReturn::new(
                format!("$global{n}"),
                Channel::Normal,
            )]))
        }
        Opcode::PushLocalVar => {
            let n = cmd.args[0];
            ctx.state_vars.insert(n);
            g.add(NodeKind::Literal(vec![LitReturn::new(
                format!("$local{n}"),
                Channel::Normal,
            )]))
        }
        Opcode::PushGlobalArray => {
            let n = cmd.args[0];
            ctx.global_arrays.insert(n);
            g.add(NodeKind::StackOp {
                args: consumes_normal_stack(1),
                returns: vec![OpReturn::new(
                    Channel::Normal,
                    RenderRule::Concat(vec![
                        Piece::Lit(format!("$globalArray{n}[")),
                        Piece::Arg(0),
                        Piece::Lit("]".to_string()),
                    ]),
                )],
                effects: Effects::default(),
            })
        }
        Opcode::IncGlobalVar | Opcode::DecGlobalVar => {
            let n = cmd.args[0];
            ctx.globals.insert(n);
            let op = if cmd.opcode == Opcode::IncGlobalVar {
                "++"
            } else {
                "--"
            };
            g.add(NodeKind::Statement(format!("$global{n}{op};")))
        }
        Opcode::IncLocalVar | Opcode::DecLocalVar => {
            let n = cmd.args[0];
            ctx.state_vars.insert(n);
            let op = if cmd.opcode == Opcode::IncLocalVar {
                "++"
            } else {
                "--"
            };
            g.add(NodeKind::Statement(format!("$local{n}{op};")))
        }
        Opcode::AssignGlobalVar
        | Opcode::AddGlobalVar
        | Opcode::SubGlobalVar
        | Opcode::MulGlobalVar
        | Opcode::DivGlobalVar
        | Opcode::ModGlobalVar => {
            let n = cmd.args[0];
            ctx.globals.insert(n);
            assign_statement(g, format!("$global{n}"), assign_symbol(cmd.opcode))
        }
        Opcode::AssignLocalVar
        | Opcode::AddLocalVar
        | Opcode::SubLocalVar
        | Opcode::MulLocalVar
        | Opcode::DivLocalVar
        | Opcode::ModLocalVar => {
            let n = cmd.args[0];
            ctx.state_vars.insert(n);
            assign_statement(g, format!("$local{n}"), assign_symbol(cmd.opcode))
        }
        Opcode::IncGlobalArray | Opcode::DecGlobalArray => {
            let n = cmd.args[0];
            ctx.global_arrays.insert(n);
            let op = if cmd.opcode == Opcode::IncGlobalArray {
                "++"
            } else {
                "--"
            };
            g.add(NodeKind::StackOp {
                args: consumes_normal_stack(1),
                returns: vec![OpReturn::new(
                    Channel::None,
                    RenderRule::Concat(vec![
                        Piece::Lit(format!("$globalArray{n}[")),
                        Piece::Arg(0),
                        Piece::Lit(format!("]{op};")),
                    ]),
                )],
                effects: Effects::default(),
            })
        }
        Opcode::AssignGlobalArray
        | Opcode::AddGlobalArray
        | Opcode::SubGlobalArray
        | Opcode::MulGlobalArray
        | Opcode::DivGlobalArray
        | Opcode::ModGlobalArray => {
            let n = cmd.args[0];
            ctx.global_arrays.insert(n);
            let symbol = assign_symbol(cmd.opcode);
            g.add(NodeKind::StackOp {
                args: consumes_normal_stack(2),
                returns: vec![OpReturn::new(
                    Channel::None,
                    RenderRule::Concat(vec![
                        Piece::Lit(format!("$globalArray{n}[")),
                        Piece::Arg(0),
                        Piece::Lit(format!("] {symbol} ")),
                        Piece::Arg(1),
                        Piece::Lit(";".to_string()),
                    ]),
                )],
                effects: Effects::default(),
            })
        }
        Opcode::Swap => g.add(NodeKind::StackOp {
            args: consumes_normal_stack(2),
            returns: vec![
                OpReturn::new(Channel::Normal, RenderRule::ArgRef(1)),
                OpReturn::new(Channel::Normal, RenderRule::ArgRef(0)),
            ],
            effects: Effects::default(),
        }),
        Opcode::Dup => g.add(NodeKind::StackOp {
            args: consumes_normal_stack(1),
            returns: vec![
                OpReturn::new(Channel::Normal, RenderRule::ArgRef(0)),
                OpReturn::new(Channel::Normal, RenderRule::ArgRef(0)),
            ],
            effects: Effects::default(),
        }),
        Opcode::ArraySet => g.add(NodeKind::StackOp {
            args: consumes_normal_stack(3),
            returns: vec![OpReturn::new(
                Channel::None,
                RenderRule::Call("memset".to_string()),
            )],
            effects: Effects::default(),
        }),
        Opcode::DropStackPosition | Opcode::Drop => g.add(NodeKind::Drop(Arg::Stack {
            channel: Channel::Normal,
            depth: 0,
        })),
        Opcode::Goto => g.add(NodeKind::Goto {
            target: cmd.args[0] as u32,
        }),
        Opcode::IfGoto => g.add(NodeKind::IfGoto {
            cond: Arg::Stack {
                channel: Channel::Normal,
                depth: 0,
            },
            target: cmd.args[0] as u32,
        }),
        Opcode::IfNotGoto => g.add(NodeKind::IfNotGoto {
            cond: Arg::Stack {
                channel: Channel::Normal,
                depth: 0,
            },
            target: cmd.args[0] as u32,
        }),
        Opcode::CaseGoto => {
            let value = cmd.args[0].to_string();
            let target = cmd.args[1] as u32;
            // the first case of a run owns the switch selector pop
            if ctx.previous == Some(Opcode::CaseGoto) {
                g.add(NodeKind::CaseGoto { value, target })
            } else {
                g.add(NodeKind::SwitchAndCase {
                    selector: Arg::Stack {
                        channel: Channel::Normal,
                        depth: 0,
                    },
                    value,
                    target,
                })
            }
        }
        other => {
            return Err(DecompileError::Internal(format!(
                "structural opcode {} inside an event body",
                other.name()
            )));
        }
    };
    Ok(node)
}

fn assign_statement(g: &mut Graph, variable: String, symbol: &str) -> NodeId {
    g.add(NodeKind::StackOp {
        args: consumes_normal_stack(1),
        returns: vec![OpReturn::new(
            Channel::None,
            RenderRule::Concat(vec![
                Piece::Lit(format!("{variable} {symbol} ")),
                Piece::Arg(0),
                Piece::Lit(";".to_string()),
            ]),
        )],
        effects: Effects::default(),
    })
}

/// Builds the node chain for one event body, places labels at jump targets,
/// resolves jumps and collapses unconditional ones into direct edges.
fn build_event_graph(
    event: &Event,
    ctx: &mut BuildCtx<'_>,
    label_positions: &HashSet<i32>,
) -> Result<(Graph, NodeId), DecompileError> {
    let mut g = Graph::new();
    let begin = g.add(NodeKind::Begin);
    let mut tail = begin;
    let mut labels: HashMap<i32, NodeId> = HashMap::new();
    let mut jumps: Vec<(NodeId, i32, bool)> = Vec::new();

    ctx.previous = None;
    for cmd in &event.commands {
        let pos = cmd.position_before as i32;
        if label_positions.contains(&pos) {
            let label = g.add(NodeKind::Label(pos as u32));
            g.set_output(tail, 0, label);
            tail = label;
            labels.insert(pos, label);
        }
        let node = create_node(&mut g, cmd, ctx)?;
        g.set_output(tail, 0, node);
        tail = node;
        if matches!(
            cmd.opcode,
            Opcode::Goto | Opcode::IfGoto | Opcode::IfNotGoto | Opcode::CaseGoto
        ) {
            jumps.push((node, *cmd.args.last().unwrap(), cmd.opcode == Opcode::Goto));
        }
        ctx.previous = Some(cmd.opcode);
    }
    // a jump may target the position just past the last command
    if let Some(last) = event.commands.last() {
        let pos = last.position_after as i32;
        if label_positions.contains(&pos) {
            let label = g.add(NodeKind::Label(pos as u32));
            g.set_output(tail, 0, label);
            tail = label;
            labels.insert(pos, label);
        }
    }
    let end = g.add(NodeKind::End);
    g.set_output(tail, 0, end);

    for (node, target, is_goto) in jumps {
        let label = *labels
            .get(&target)
            .ok_or(DecompileError::DanglingLabel { offset: target })?;
        g.set_output(node, 1, label);
        if is_goto {
            g.replace_goto_with_edge(node);
        }
    }
    Ok((g, begin))
}

/// Renders a parsed script back to BOTC source text.
fn render_script(script: &ParsedScript) -> Result<String, DecompileError> {
    let mut globals: BTreeSet<i32> = BTreeSet::new();
    let mut global_arrays: BTreeSet<i32> = BTreeSet::new();
    let mut sections: Vec<String> = Vec::new();

    for state in &script.states {
        let mut state_vars: BTreeSet<i32> = BTreeSet::new();
        let mut events_text = String::new();
        for event in &state.events {
            let mut ctx = BuildCtx {
                strings: &script.strings,
                globals: &mut globals,
                global_arrays: &mut global_arrays,
                state_vars: &mut state_vars,
                previous: None,
            };
            let (mut g, begin) = build_event_graph(event, &mut ctx, &script.label_positions)?;
            rewrite::compact(&mut g, begin)?;
            let body = rewrite::stringify(&g, begin)?;
            events_text.push_str(&format!("\t{} {{\n", event.title()));
            if !body.is_empty() {
                events_text.push_str(&body);
                events_text.push('\n');
            }
            events_text.push_str("\t}\n");
        }
        if state.is_global() && state.events.is_empty() {
            continue;
        }
        let mut section = String::new();
        if !state.is_global() {
            section.push_str(&format!("state \"{}\": // {}\n", state.name, state.index));
        }
        for v in &state_vars {
            section.push_str(&format!("\tvar int $local{v};\n"));
        }
        if !state_vars.is_empty() {
            section.push('\n');
        }
        section.push_str(&events_text);
        sections.push(section);
    }

    let mut out = String::new();
    out.push_str("#!botc 1.0.0\n#include \"debotc_defs.bts\"\n\n");
    for v in &globals {
        out.push_str(&format!("var int $global{v};\n"));
    }
    for v in &global_arrays {
        out.push_str(&format!("var int $globalArray{v}[];\n"));
    }
    if !globals.is_empty() || !global_arrays.is_empty() {
        out.push('\n');
    }
    for section in sections {
        out.push_str(&section);
        out.push('\n');
    }
    Ok(out)
}

/// Readable pseudocode shown in the third disassembly column.
fn describe_readable(cmd: &Command, strings: &[String]) -> String {
    const POPPED: &str = " // stack arguments are popped by the function";
    if let Some((symbol, arity)) = operator_info(cmd.opcode) {
        return if arity == 1 {
            format!("stack.push( {symbol}stack[0] ){POPPED}")
        } else {
            format!("stack.push( stack[1] {symbol} stack[0] ){POPPED}")
        };
    }
    match cmd.opcode {
        Opcode::Command => {
            let info = &BOT_COMMANDS[cmd.args[0] as usize];
            let mut args: Vec<String> = (0..info.num_args)
                .rev()
                .map(|d| format!("stack[{d}]"))
                .collect();
            args.extend(
                (0..info.num_string_args)
                    .rev()
                    .map(|d| format!("stringStack[{d}]")),
            );
            let popped = if args.is_empty() { "" } else { POPPED };
            format!("{}({}){popped}", info.name, args.join(", "))
        }
        Opcode::PushNumber => format!("stack.push( {} )", cmd.args[0]),
        Opcode::PushStringIndex => {
            let index = cmd.args[0];
            match usize::try_from(index).ok().and_then(|i| strings.get(i)) {
                Some(text) => format!("stringStack.push( \"{text}\" )"),
                None => format!("stringStack.push( strings[{index}] )"),
            }
        }
        Opcode::PushGlobalVar => format!("stack.push( $global{} )", cmd.args[0]),
        Opcode::PushLocalVar => format!("stack.push( $local{} )", cmd.args[0]),
        Opcode::PushGlobalArray => {
            format!("stack.push( $globalArray{}[stack[0]] ){POPPED}", cmd.args[0])
        }
        Opcode::Goto => format!("goto 0x{:X}", cmd.args[0]),
        Opcode::IfGoto => format!("if (stack[0]) goto 0x{:X}{POPPED}", cmd.args[0]),
        Opcode::IfNotGoto => format!("if (!(stack[0])) goto 0x{:X}{POPPED}", cmd.args[0]),
        Opcode::CaseGoto => format!("if (stack[0] == {}) goto 0x{:X}", cmd.args[0], cmd.args[1]),
        Opcode::DropStackPosition | Opcode::Drop => "stack.pop() /* result ignored */".to_string(),
        Opcode::Swap => "(swap last stack items)".to_string(),
        Opcode::Dup => "(duplicate stack item)".to_string(),
        Opcode::ArraySet => format!("memset(stack[2], stack[1], stack[0]){POPPED}"),
        Opcode::IncGlobalVar => format!("$global{}++", cmd.args[0]),
        Opcode::DecGlobalVar => format!("$global{}--", cmd.args[0]),
        Opcode::IncLocalVar => format!("$local{}++", cmd.args[0]),
        Opcode::DecLocalVar => format!("$local{}--", cmd.args[0]),
        Opcode::AssignGlobalVar
        | Opcode::AddGlobalVar
        | Opcode::SubGlobalVar
        | Opcode::MulGlobalVar
        | Opcode::DivGlobalVar
        | Opcode::ModGlobalVar => format!(
            "$global{} {} stack[0]{POPPED}",
            cmd.args[0],
            assign_symbol(cmd.opcode)
        ),
        Opcode::AssignLocalVar
        | Opcode::AddLocalVar
        | Opcode::SubLocalVar
        | Opcode::MulLocalVar
        | Opcode::DivLocalVar
        | Opcode::ModLocalVar => format!(
            "$local{} {} stack[0]{POPPED}",
            cmd.args[0],
            assign_symbol(cmd.opcode)
        ),
        Opcode::IncGlobalArray => format!("$globalArray{}[stack[0]]++{POPPED}", cmd.args[0]),
        Opcode::DecGlobalArray => format!("$globalArray{}[stack[0]]--{POPPED}", cmd.args[0]),
        Opcode::AssignGlobalArray
        | Opcode::AddGlobalArray
        | Opcode::SubGlobalArray
        | Opcode::MulGlobalArray
        | Opcode::DivGlobalArray
        | Opcode::ModGlobalArray => format!(
            "$globalArray{}[stack[1]] {} stack[0]{POPPED}",
            cmd.args[0],
            assign_symbol(cmd.opcode)
        ),
        _ => String::new(),
    }
}

/// Parses a compiled bot script into its structural form.
pub fn parse(data: &[u8]) -> Result<ParsedScript, DecompileError> {
    let mut parser = Parser::new(data, None);
    parser.run()?;
    parser.into_script()
}

/// Decompiles a compiled bot script to BOTC source text.
pub fn decompile(data: &[u8]) -> Result<String, DecompileError> {
    render_script(&parse(data)?)
}

/// Writes a disassembly listing, one line per record. Lines are emitted
/// progressively, so a parse failure partway leaves everything before it.
pub fn disassemble_to(data: &[u8], out: &mut dyn Write) -> Result<(), DecompileError> {
    let mut parser = Parser::new(data, Some(out));
    parser.run()
}

pub fn decompile_with_mode(data: &[u8], mode: DecompileMode) -> Result<String, DecompileError> {
    match mode {
        DecompileMode::Script => decompile(data),
        DecompileMode::Disasm => {
            let mut buf = Vec::new();
            disassemble_to(data, &mut buf)?;
            String::from_utf8(buf)
                .map_err(|_| DecompileError::Internal("non-UTF-8 disassembly".to_string()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Little-endian byte stream builder for hand-written object files.
    struct Bc(Vec<u8>);

    impl Bc {
        fn new() -> Bc {
            Bc(Vec::new())
        }

        fn op(self, opcode: Opcode) -> Bc {
            self.i(opcode.index())
        }

        fn i(mut self, value: i32) -> Bc {
            self.0.extend_from_slice(&value.to_le_bytes());
            self
        }

        fn s(mut self, text: &str) -> Bc {
            self = self.i(text.len() as i32);
            self.0.extend_from_slice(text.as_bytes());
            self
        }

        fn len(&self) -> usize {
            self.0.len()
        }

        fn build(self) -> Vec<u8> {
            self.0
        }
    }

    fn random_mainloop() -> Vec<u8> {
        Bc::new()
            .op(Opcode::StateName)
            .s("main")
            .op(Opcode::StateIdx)
            .i(0)
            .op(Opcode::MainLoop)
            .op(Opcode::PushNumber)
            .i(5)
            .op(Opcode::PushNumber)
            .i(7)
            .op(Opcode::Command)
            .i(2) // Random
            .i(2)
            .op(Opcode::EndMainLoop)
            .build()
    }

    #[test]
    fn decompiles_a_mainloop_with_a_builtin_call() {
        let out = decompile(&random_mainloop()).unwrap();
        assert!(out.starts_with("#!botc 1.0.0\n#include \"debotc_defs.bts\"\n"));
        assert!(out.contains("state \"main\": // 0\n"));
        assert!(out.contains("\tmainloop {\n"));
        assert!(out.contains("\t\tstack = Random(5, 7);\n"));
    }

    #[test]
    fn declared_arity_mismatch_fails() {
        let data = Bc::new()
            .op(Opcode::StateName)
            .s("main")
            .op(Opcode::StateIdx)
            .i(0)
            .op(Opcode::MainLoop)
            .op(Opcode::Command)
            .i(2) // Random takes 2 arguments
            .i(3)
            .op(Opcode::EndMainLoop)
            .build();
        let err = decompile(&data).unwrap_err();
        assert!(matches!(
            err,
            DecompileError::ArgCountMismatch {
                command: "Random",
                declared: 3,
                expected: 2,
            }
        ));
    }

    #[test]
    fn if_block_with_trailing_label_structures() {
        let mut b = Bc::new()
            .op(Opcode::StateName)
            .s("main")
            .op(Opcode::StateIdx)
            .i(0)
            .op(Opcode::OnEnter)
            .op(Opcode::PushGlobalVar)
            .i(0)
            .op(Opcode::IfNotGoto);
        // jump lands just after the increment, on the DH_ENDONENTER record
        let target = (b.len() + 4 + 8) as i32;
        b = b
            .i(target)
            .op(Opcode::IncGlobalVar)
            .i(1)
            .op(Opcode::EndOnEnter);
        let out = decompile(&b.build()).unwrap();
        assert!(out.contains("var int $global0;\nvar int $global1;\n"));
        assert!(out.contains("\tonenter {\n"));
        assert!(out.contains("\t\tif ($global0) {\n\t\t\t$global1++;\n\t\t}\n"));
    }

    #[test]
    fn local_variables_are_declared_in_the_state() {
        let data = Bc::new()
            .op(Opcode::StateName)
            .s("main")
            .op(Opcode::StateIdx)
            .i(0)
            .op(Opcode::OnEnter)
            .op(Opcode::PushLocalVar)
            .i(3)
            .op(Opcode::Drop)
            .op(Opcode::EndOnEnter)
            .build();
        let out = decompile(&data).unwrap();
        assert!(out.contains("\tvar int $local3;\n"));
        assert!(out.contains("\t\t$local3 /* result ignored */;\n"));
    }

    #[test]
    fn scripted_event_in_the_global_state() {
        let data = Bc::new().op(Opcode::Event).i(7).op(Opcode::EndEvent).build();
        let out = decompile(&data).unwrap();
        assert!(out.contains("\tevent \"playersay\" {\n\t}\n"));
    }

    #[test]
    fn string_arguments_come_from_the_string_table() {
        let data = Bc::new()
            .op(Opcode::StringList)
            .i(1)
            .s("hello")
            .op(Opcode::Event)
            .i(7)
            .op(Opcode::PushStringIndex)
            .i(0)
            .op(Opcode::Command)
            .i(49) // Say
            .i(1)
            .op(Opcode::EndEvent)
            .build();
        let out = decompile(&data).unwrap();
        assert!(out.contains("\t\tSay(\"hello\");\n"));
    }

    #[test]
    fn world_handler_in_the_global_state_is_rejected() {
        let data = Bc::new().op(Opcode::MainLoop).build();
        assert!(matches!(
            decompile(&data).unwrap_err(),
            DecompileError::EventOutsideState
        ));
    }

    #[test]
    fn command_outside_any_event_is_rejected() {
        let data = Bc::new()
            .op(Opcode::StateName)
            .s("main")
            .op(Opcode::StateIdx)
            .i(0)
            .op(Opcode::PushNumber)
            .i(5)
            .build();
        assert!(matches!(
            decompile(&data).unwrap_err(),
            DecompileError::UnexpectedCommandOutsideEvent { .. }
        ));
    }

    #[test]
    fn state_index_gaps_are_rejected() {
        let data = Bc::new()
            .op(Opcode::StateName)
            .s("second")
            .op(Opcode::StateIdx)
            .i(1)
            .build();
        assert!(matches!(
            decompile(&data).unwrap_err(),
            DecompileError::MissingState { index: 0 }
        ));
    }

    #[test]
    fn second_string_table_is_rejected() {
        let data = Bc::new()
            .op(Opcode::StringList)
            .i(1)
            .s("x")
            .op(Opcode::StringList)
            .i(0)
            .build();
        assert!(matches!(
            decompile(&data).unwrap_err(),
            DecompileError::DuplicateStringTable
        ));
    }

    #[test]
    fn truncated_input_is_out_of_bounds() {
        let data = Bc::new().op(Opcode::Event).build();
        assert!(matches!(
            decompile(&data).unwrap_err(),
            DecompileError::OutOfBounds { .. }
        ));
    }

    #[test]
    fn unknown_opcode_is_malformed() {
        let data = Bc::new().i(99).build();
        assert!(matches!(
            decompile(&data).unwrap_err(),
            DecompileError::MalformedOpcode {
                value: 99,
                offset: 0,
            }
        ));
    }

    #[test]
    fn disassembly_lists_every_record() {
        let out = decompile_with_mode(&random_mainloop(), DecompileMode::Disasm).unwrap();
        assert!(out.contains("state \"main\": // 0"));
        assert!(out.contains("DH_MAINLOOP"));
        assert!(out.contains("DH_PUSHNUMBER 5"));
        assert!(out.contains("stack.push( 5 )"));
        assert!(out.contains("DH_COMMAND 2, 2"));
        assert!(out.contains(
            "Random(stack[1], stack[0]) // stack arguments are popped by the function"
        ));
        assert!(out.contains("DH_ENDMAINLOOP"));
    }

    #[test]
    fn disassembly_is_progressive_on_failure() {
        let mut data = random_mainloop();
        data.extend_from_slice(&99i32.to_le_bytes());
        let mut buf = Vec::new();
        let err = disassemble_to(&data, &mut buf).unwrap_err();
        assert!(matches!(err, DecompileError::MalformedOpcode { .. }));
        let listing = String::from_utf8(buf).unwrap();
        assert!(listing.contains("DH_ENDMAINLOOP"));
    }

    #[test]
    fn parsed_script_exposes_the_structure() {
        let script = parse(&random_mainloop()).unwrap();
        assert_eq!(script.states.len(), 2);
        assert!(script.states[0].is_global());
        assert_eq!(script.states[1].name, "main");
        let event = &script.states[1].events[0];
        assert_eq!(event.title(), "mainloop");
        assert_eq!(event.commands.len(), 3);
        assert_eq!(event.commands[2].opcode, Opcode::Command);
    }
}
