// Integration tests for move-group dispatch against simulated nodes

#[cfg(test)]
mod tests {
    use canmotion::motion::{AxisStep, MoveGroups, MoveStep, Sequence, TipActionStep};
    use canmotion::move_execution::{
        CompletionMessage, MoveDispatcher, MoveError, MoveGroupInfo, MoveGroupRunner,
    };
    use canmotion_shared::config::TimeoutPolicy;
    use canmotion_shared::messages::{ErrorMessagePayload, MoveCompletedPayload, TipActionResponsePayload};
    use canmotion_shared::{
        ErrorCode, ErrorSeverity, GearMotorId, IncomingMessage, MotorPositionFlags, MoveAckId, NodeId,
        Request, StopCondition, TipActionType,
    };
    use canmotion_simulator::{Fault, SimulatedBus};
    use std::time::Duration;
    use tokio::time::Instant;
    use tokio_test::{assert_err, assert_ok};

    fn sequence(steps: impl IntoIterator<Item = (NodeId, MoveStep)>) -> Sequence {
        steps.into_iter().collect()
    }

    fn stall_move(duration: f64) -> MoveStep {
        MoveStep::Linear(AxisStep {
            distance_mm: 0.0,
            velocity_mm_sec: 10.0,
            acceleration_mm_sec_sq: 0.0,
            duration_sec: duration,
            stop_condition: StopCondition::Stall,
        })
    }

    fn tip_clamp(duration: f64) -> MoveStep {
        MoveStep::TipAction(TipActionStep {
            velocity_mm_sec: 5.0,
            acceleration_mm_sec_sq: 0.0,
            duration_sec: duration,
            action: TipActionType::Clamp,
            stop_condition: StopCondition::None,
            gear_motors: GearMotorId::ALL.into_iter().collect(),
        })
    }

    fn stray_completion(group_id: u8, seq_id: u8) -> IncomingMessage {
        IncomingMessage::MoveCompleted(MoveCompletedPayload {
            group_id,
            seq_id,
            current_position_um: 99_000,
            encoder_position_um: 99_000,
            position_flags: MotorPositionFlags::all_ok(),
            ack_id: MoveAckId::CompleteWithoutCondition,
        })
    }

    fn firmware_error(severity: ErrorSeverity, error_code: ErrorCode) -> IncomingMessage {
        IncomingMessage::Error(ErrorMessagePayload { severity, error_code })
    }

    fn stop_requests(bus: &SimulatedBus) -> usize {
        bus.sent()
            .iter()
            .filter(|record| record.message == Request::Stop)
            .count()
    }

    #[tokio::test(start_paused = true)]
    async fn test_groups_never_overlap() {
        let plan: MoveGroups = (0..3)
            .map(|_| vec![sequence([(NodeId::GantryX, MoveStep::linear(10.0, 0.5))])])
            .collect();
        let bus = SimulatedBus::new([NodeId::GantryX]);
        let mut runner = MoveGroupRunner::new(plan);
        let outcome = assert_ok!(runner.run(&bus).await);
        assert_eq!(outcome.completions.len(), 3);

        let broadcasts: Vec<(u8, Duration)> = bus
            .sent()
            .iter()
            .filter_map(|record| record.executed_group().map(|group| (group, record.at)))
            .collect();
        assert_eq!(broadcasts.iter().map(|(g, _)| *g).collect::<Vec<_>>(), vec![0, 1, 2]);
        for pair in broadcasts.windows(2) {
            assert!(
                pair[1].1 >= pair[0].1 + Duration::from_millis(500),
                "group {} broadcast before group {} resolved",
                pair[1].0,
                pair[0].0
            );
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_and_foreign_completions_are_ignored() {
        let plan = vec![vec![sequence([(NodeId::GantryX, MoveStep::linear(10.0, 0.5))])]];
        let bus = SimulatedBus::new([NodeId::GantryX, NodeId::GantryY]);
        let injector = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(100)).await;
            // a leftover from an earlier, cleared group
            injector.inject(NodeId::GantryX, stray_completion(7, 0));
            // a node that has nothing in this group
            injector.inject(NodeId::GantryY, stray_completion(0, 0));
            // a sequence that was never scheduled
            injector.inject(NodeId::GantryX, stray_completion(0, 4));
        });

        let mut runner = MoveGroupRunner::new(plan);
        let outcome = assert_ok!(runner.run(&bus).await);
        assert_eq!(outcome.completions.len(), 1);
        assert_eq!(outcome.completions[0].node, NodeId::GantryX);
        assert!((outcome.positions[&NodeId::GantryX].motor_position - 5.0).abs() < 1e-3);
        assert!(!outcome.positions.contains_key(&NodeId::GantryY));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tip_action_waits_for_both_gear_motors() {
        let plan = vec![vec![sequence([(NodeId::PipetteLeft, tip_clamp(0.25))])]];
        let bus = SimulatedBus::new([NodeId::PipetteLeft]);
        bus.inject_fault(NodeId::PipetteLeft, Fault::DropGearMotor { seq: 0, motor: GearMotorId::Right });
        let injector = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(800)).await;
            injector.inject(
                NodeId::PipetteLeft,
                IncomingMessage::TipActionResponse(TipActionResponsePayload {
                    group_id: 0,
                    seq_id: 0,
                    current_position_um: 1_250,
                    encoder_position_um: 1_250,
                    position_flags: MotorPositionFlags::all_ok(),
                    ack_id: MoveAckId::CompleteWithoutCondition,
                    action: TipActionType::Clamp,
                    success: true,
                    gear_motor_id: GearMotorId::Right,
                }),
            );
        });

        let start = Instant::now();
        let mut runner = MoveGroupRunner::new(plan);
        let outcome = assert_ok!(runner.run(&bus).await);
        assert!(start.elapsed() >= Duration::from_millis(800));
        assert_eq!(outcome.completions.len(), 2);
        assert!(outcome.completions.iter().all(|c| matches!(c.message, CompletionMessage::TipActionResponse(_))));
        let gears = &outcome.gear_motor_positions[&NodeId::PipetteLeft];
        assert_eq!(gears.len(), 2);
        assert!(outcome.positions.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_gear_motor_times_out() {
        let plan = vec![vec![sequence([(NodeId::PipetteLeft, tip_clamp(0.25))])]];
        let bus = SimulatedBus::new([NodeId::PipetteLeft]);
        bus.inject_fault(NodeId::PipetteLeft, Fault::DropGearMotor { seq: 0, motor: GearMotorId::Left });

        let mut runner = MoveGroupRunner::new(plan);
        let err = assert_err!(runner.run(&bus).await);
        match err {
            MoveError::TimedOut { missing_nodes, .. } => assert_eq!(missing_nodes, vec![NodeId::PipetteLeft]),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stall_drops_remaining_moves_of_that_node() {
        let plan = vec![vec![
            sequence([(NodeId::GantryX, stall_move(0.5)), (NodeId::GantryY, MoveStep::linear(1.0, 0.5))]),
            sequence([(NodeId::GantryX, stall_move(0.5))]),
            sequence([(NodeId::GantryX, stall_move(0.5))]),
        ]];
        let bus = SimulatedBus::new([NodeId::GantryX, NodeId::GantryY]);
        bus.inject_fault(NodeId::GantryX, Fault::StallAt { seq: 1 });

        let start = Instant::now();
        let mut runner = MoveGroupRunner::new(plan);
        let outcome = assert_ok!(runner.run(&bus).await);
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000));
        assert!(elapsed < Duration::from_millis(1100), "waited {:?}", elapsed);

        let x_completions = outcome
            .completions
            .iter()
            .filter(|c| c.node == NodeId::GantryX)
            .count();
        assert_eq!(x_completions, 2);
        assert_eq!(stop_requests(&bus), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_home_then_backoff_waits_for_the_backoff() {
        let plan = vec![
            vec![
                sequence([(NodeId::Head, MoveStep::home(-20.0, 0.5))]),
                sequence([(NodeId::Head, MoveStep::linear(10.0, 1.0))]),
            ],
            vec![sequence([(NodeId::GantryX, MoveStep::linear(5.0, 0.5))])],
        ];
        let bus = SimulatedBus::new([NodeId::Head, NodeId::GantryX]);
        bus.set_position(NodeId::Head, 80.0);

        let mut runner = MoveGroupRunner::new(plan);
        let outcome = assert_ok!(runner.run(&bus).await);
        let head: Vec<u8> = outcome
            .completions
            .iter()
            .filter(|c| c.node == NodeId::Head)
            .map(|c| c.message.ids().1)
            .collect();
        assert_eq!(head, vec![0, 1]);
        assert!((outcome.positions[&NodeId::Head].motor_position - 10.0).abs() < 1e-3);

        let second_broadcast = bus
            .sent()
            .iter()
            .find(|record| record.executed_group() == Some(1))
            .map(|record| record.at)
            .unwrap();
        assert!(second_broadcast >= Duration::from_millis(1500), "broadcast at {:?}", second_broadcast);
        assert_eq!(stop_requests(&bus), 0);
    }

    #[tokio::test]
    async fn test_group_ids_past_255_are_refused() {
        let bus = SimulatedBus::new([NodeId::GantryX]);
        let mut dispatcher =
            MoveDispatcher::new(vec![MoveGroupInfo::default(); 3], 254, TimeoutPolicy::default());
        let err = assert_err!(dispatcher.run(&bus).await);
        assert!(matches!(err, MoveError::PlanTooLarge(_)));
        assert!(bus.sent().is_empty());
        assert_eq!(bus.listener_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_names_nodes_that_never_reported() {
        let plan = vec![vec![sequence([
            (NodeId::GantryX, MoveStep::linear(10.0, 0.75)),
            (NodeId::GantryY, MoveStep::linear(10.0, 0.75)),
            (NodeId::Head, MoveStep::linear(10.0, 0.5)),
        ])]];
        let bus = SimulatedBus::new([NodeId::GantryX, NodeId::GantryY, NodeId::Head]);
        bus.inject_fault(NodeId::GantryY, Fault::Silent);

        let start = Instant::now();
        let mut runner = MoveGroupRunner::new(plan);
        let err = assert_err!(runner.run(&bus).await);
        let elapsed = start.elapsed();
        // max(1.0, 2 * 0.75)
        assert!(elapsed >= Duration::from_millis(1500));
        assert!(elapsed < Duration::from_millis(1600), "waited {:?}", elapsed);
        match err {
            MoveError::TimedOut {
                group_id,
                missing_nodes,
                full_timeout,
                ..
            } => {
                assert_eq!(group_id, 0);
                assert_eq!(missing_nodes, vec![NodeId::GantryY]);
                assert_eq!(full_timeout, Duration::from_secs_f64(1.5));
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_short_groups_get_the_minimum_timeout() {
        let plan = vec![vec![sequence([(NodeId::Head, MoveStep::linear(1.0, 0.1))])]];
        let bus = SimulatedBus::new([NodeId::Head]);
        bus.inject_fault(NodeId::Head, Fault::Silent);

        let start = Instant::now();
        let mut runner = MoveGroupRunner::new(plan);
        let err = assert_err!(runner.run(&bus).await);
        assert!(matches!(err, MoveError::TimedOut { .. }));
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(1) && elapsed < Duration::from_millis(1100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_home_without_limit_switch_fails_and_stops() {
        let plan = vec![
            vec![sequence([(NodeId::Head, MoveStep::home(-10.0, 0.5))])],
            vec![sequence([(NodeId::GantryX, MoveStep::linear(10.0, 0.5))])],
        ];
        let bus = SimulatedBus::new([NodeId::Head, NodeId::GantryX]);
        bus.inject_fault(
            NodeId::Head,
            Fault::AckWith {
                seq: 0,
                ack: MoveAckId::CompleteWithoutCondition,
            },
        );

        let mut runner = MoveGroupRunner::new(plan);
        let err = assert_err!(runner.run(&bus).await);
        match err {
            MoveError::ConditionNotMet {
                group_id,
                node,
                stop_condition,
                ack,
            } => {
                assert_eq!(group_id, 0);
                assert_eq!(node, NodeId::Head);
                assert_eq!(stop_condition, StopCondition::LimitSwitch);
                assert_eq!(ack, MoveAckId::CompleteWithoutCondition);
            }
            other => panic!("unexpected error {:?}", other),
        }
        assert_eq!(stop_requests(&bus), 1);
        let executed: Vec<u8> = bus.sent().iter().filter_map(|r| r.executed_group()).collect();
        assert_eq!(executed, vec![0]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unrecoverable_error_stops_without_waiting() {
        let plan = vec![vec![
            sequence([(NodeId::GantryX, MoveStep::linear(10.0, 1.0))]),
            sequence([(NodeId::GantryX, MoveStep::linear(10.0, 1.0))]),
        ]];
        let bus = SimulatedBus::new([NodeId::GantryX]);
        bus.inject_fault(
            NodeId::GantryX,
            Fault::FirmwareError {
                seq: 0,
                severity: ErrorSeverity::Unrecoverable,
                code: ErrorCode::Hardware,
            },
        );

        let start = Instant::now();
        let mut runner = MoveGroupRunner::new(plan);
        let err = assert_err!(runner.run(&bus).await);
        assert!(start.elapsed() < Duration::from_millis(1100));
        assert!(matches!(
            err,
            MoveError::Firmware {
                node: NodeId::GantryX,
                error_code: ErrorCode::Hardware,
                severity: ErrorSeverity::Unrecoverable,
            }
        ));
        assert_eq!(stop_requests(&bus), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_error_does_not_fail_the_group() {
        let plan = vec![vec![sequence([(NodeId::GantryX, MoveStep::linear(10.0, 0.5))])]];
        let bus = SimulatedBus::new([NodeId::GantryX]);
        bus.inject_fault(
            NodeId::GantryX,
            Fault::FirmwareError {
                seq: 0,
                severity: ErrorSeverity::Recoverable,
                code: ErrorCode::CollisionDetected,
            },
        );

        let mut runner = MoveGroupRunner::new(plan);
        let outcome = assert_ok!(runner.run(&bus).await);
        assert_eq!(outcome.completions.len(), 1);
        assert_eq!(stop_requests(&bus), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_estop_is_raised_alone() {
        let plan = vec![vec![sequence([
            (NodeId::GantryX, MoveStep::linear(10.0, 2.0)),
            (NodeId::GantryY, MoveStep::linear(10.0, 2.0)),
        ])]];
        let bus = SimulatedBus::new([NodeId::GantryX, NodeId::GantryY]);
        let injector = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            injector.inject(NodeId::GantryY, firmware_error(ErrorSeverity::Recoverable, ErrorCode::CollisionDetected));
            injector.inject(NodeId::GantryX, firmware_error(ErrorSeverity::Unrecoverable, ErrorCode::EstopDetected));
        });

        let mut runner = MoveGroupRunner::new(plan);
        let err = assert_err!(runner.run(&bus).await);
        assert!(err.is_estop(), "unexpected error {:?}", err);
    }

    #[tokio::test(start_paused = true)]
    async fn test_multiple_errors_are_wrapped() {
        let plan = vec![vec![sequence([(NodeId::GantryX, MoveStep::linear(10.0, 2.0))])]];
        let bus = SimulatedBus::new([NodeId::GantryX]);
        let injector = bus.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(200)).await;
            injector.inject(NodeId::GantryX, firmware_error(ErrorSeverity::Warning, ErrorCode::MotorBusy));
            injector.inject(NodeId::GantryX, firmware_error(ErrorSeverity::Unrecoverable, ErrorCode::Hardware));
        });

        let mut runner = MoveGroupRunner::new(plan);
        let err = assert_err!(runner.run(&bus).await);
        match err {
            MoveError::MotionFailed { group_id, errors } => {
                assert_eq!(group_id, 0);
                assert_eq!(errors.len(), 2);
            }
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_listener_removed_after_success_and_failure() {
        let plan = vec![vec![sequence([(NodeId::GantryX, MoveStep::linear(10.0, 0.2))])]];
        let bus = SimulatedBus::new([NodeId::GantryX]);
        let mut runner = MoveGroupRunner::new(plan.clone());
        assert_ok!(runner.run(&bus).await);
        assert_eq!(bus.listener_count(), 0);

        let silent = SimulatedBus::new([NodeId::GantryX]);
        silent.inject_fault(NodeId::GantryX, Fault::Silent);
        let mut runner = MoveGroupRunner::new(plan);
        assert_err!(runner.run(&silent).await);
        assert_eq!(silent.listener_count(), 0);
    }
}
