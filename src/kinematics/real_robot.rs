// Closed-form forward kinematics of the three-section arm
// Expanded product of the three twisted section transforms. Agrees with
// composing the sections one by one, without the intermediate matrices.

use nalgebra::SMatrix;

use super::config_to_pose::BendVector;
use super::multi_section::{compose_sections, stack_homogeneous};

const SQRT_3: f64 = 1.732_050_807_568_877_2;

/// Stacked homogeneous transforms [T1; T2; T3] of the three sections
///
/// Each block is the base-to-tip transform of one section in the arm's base
/// frame. The expansion divides by each section's bend angle, so any
/// straight section goes through the generic composition instead.
#[allow(clippy::too_many_lines, clippy::similar_names)]
pub fn real_robot_fk(s: &[f64; 3], deltax: &[f64; 3], deltay: &[f64; 3]) -> SMatrix<f64, 12, 4> {
    if (0..3).any(|i| deltax[i] * deltax[i] + deltay[i] * deltay[i] == 0.0) {
        let sections = [0, 1, 2].map(|i| BendVector::new(s[i], deltax[i], deltay[i]));
        return stack_homogeneous(&compose_sections(&sections));
    }

    let [s1, s2, s3] = *s;
    let [deltax1, deltax2, deltax3] = *deltax;
    let [deltay1, deltay2, deltay3] = *deltay;

    let t2 = deltax1.powi(2);
    let t3 = deltax2.powi(2);
    let t4 = deltay1.powi(2);
    let t5 = deltax3.powi(2);
    let t6 = deltay2.powi(2);
    let t7 = deltay3.powi(2);
    let t8 = SQRT_3;
    let t9 = t2 + t4;
    let t10 = t3 + t6;
    let t11 = t5 + t7;
    let t12 = 1.0 / t9;
    let t13 = 1.0 / t10;
    let t14 = 1.0 / t11;
    let t15 = t9.sqrt();
    let t16 = t10.sqrt();
    let t17 = t11.sqrt();
    let t18 = 1.0 / t15;
    let t19 = 1.0 / t16;
    let t20 = 1.0 / t17;
    let t21 = t15.cos();
    let t22 = t16.cos();
    let t23 = t17.cos();
    let t24 = t15.sin();
    let t25 = t16.sin();
    let t26 = t17.sin();
    let t27 = t21 - 1.0;
    let t28 = t22 - 1.0;
    let t29 = t23 - 1.0;
    let t30 = t21 * t22;
    let t31 = deltax1 * t18 * t24;
    let t32 = deltay1 * t18 * t24;
    let t33 = s1 * t18 * t24;
    let t62 = deltax2 * t19 * t21 * t25;
    let t63 = deltay2 * t19 * t21 * t25;
    let t64 = s2 * t19 * t21 * t25;
    let t34 = deltax1 * deltay1 * t12 * t27;
    let t35 = deltax1 * s1 * t12 * t27;
    let t36 = deltay1 * s1 * t12 * t27;
    let t37 = t2 * t12 * t27;
    let t38 = t4 * t12 * t27;
    let t39 = t3 * t13 * t28;
    let t40 = t6 * t13 * t28;
    let t41 = t5 * t14 * t29;
    let t42 = t7 * t14 * t29;
    let t43 = t31 / 2.0;
    let t44 = t32 / 2.0;
    let t57 = t8 * t31 * (-1.0 / 2.0);
    let t60 = t22 * t31;
    let t61 = t22 * t32;
    let t67 = t62 / 2.0;
    let t68 = t63 / 2.0;
    let t69 = deltax2 * t19 * t25 * t31;
    let t70 = deltay2 * t19 * t25 * t31;
    let t71 = deltax2 * t19 * t25 * t32;
    let t72 = deltay2 * t19 * t25 * t32;
    let t73 = s2 * t19 * t25 * t31;
    let t74 = s2 * t19 * t25 * t32;
    let t45 = t34 / 2.0;
    let t46 = t37 + 1.0;
    let t47 = t38 + 1.0;
    let t48 = t39 + 1.0;
    let t49 = t40 + 1.0;
    let t50 = t41 + 1.0;
    let t51 = t42 + 1.0;
    let t52 = t37 / 2.0;
    let t53 = t38 / 2.0;
    let t56 = t8 * t44;
    let t59 = t8 * t34 * (-1.0 / 2.0);
    let t77 = -t73;
    let t78 = -t74;
    let t79 = deltax2 * t19 * t25 * t43;
    let t81 = deltax2 * t19 * t25 * t44;
    let t84 = t72 * (-1.0 / 2.0);
    let t86 = t44 + t57;
    let t58 = t8 * t45;
    let t65 = t8 * t46 / 2.0;
    let t66 = t8 * t47 / 2.0;
    let t85 = t43 + t56;
    let t90 = t53 + t59 + 1.0 / 2.0;
    let t92 = deltax2 * t19 * t25 * t86;
    let t96 = deltax2 * deltay2 * t13 * t28 * t86;
    let t97 = deltax2 * s2 * t13 * t28 * t86;
    let t103 = t48 * t86;
    let t87 = t45 + t66;
    let t88 = t52 + t58 + 1.0 / 2.0;
    let t91 = deltay2 * t19 * t25 * t85;
    let t94 = deltax2 * deltay2 * t13 * t28 * t85;
    let t95 = deltay2 * s2 * t13 * t28 * t85;
    let t98 = -t96;
    let t100 = -t97;
    let t101 = t49 * t85;
    let t102 = t96 / 2.0;
    let t107 = -deltax2 * t19 * t25 * (t45 - t65);
    let t108 = deltax2 * t19 * t25 * t90;
    let t109 = -t103;
    let t113 = t103 / 2.0;
    let t116 = deltax2 * deltay2 * t13 * t28 * t90;
    let t117 = deltax2 * s2 * t13 * t28 * t90;
    let t121 = -deltax2 * s2 * t13 * t28 * (t45 - t65);
    let t129 = deltax2 * deltay2 * t13 * t28 * (t45 - t65) * (-1.0 / 2.0);
    let t133 = t48 * t90;
    let t134 = deltax2 * deltay2 * t13 * t28 * (t45 - t65) / 2.0;
    let t93 = -t91;
    let t99 = t94 / 2.0;
    let t104 = -t102;
    let t105 = deltay2 * t19 * t25 * t87;
    let t106 = deltay2 * t19 * t25 * t88;
    let t110 = t101 / 2.0;
    let t111 = deltax2 * deltay2 * t13 * t28 * t88;
    let t112 = deltay2 * s2 * t13 * t28 * t88;
    let t114 = deltax2 * deltay2 * t13 * t28 * t87;
    let t115 = deltay2 * s2 * t13 * t28 * t87;
    let t118 = -t108;
    let t119 = -t113;
    let t124 = -t117;
    let t126 = t116 / 2.0;
    let t127 = t49 * t87;
    let t128 = t49 * t88;
    let t139 = t133 / 2.0;
    let t142 = t62 + t94 + t109;
    let t143 = t63 + t98 + t101;
    let t122 = -t114;
    let t123 = t111 / 2.0;
    let t125 = t114 / 2.0;
    let t131 = -t126;
    let t135 = -t127;
    let t136 = t127 / 2.0;
    let t137 = t128 / 2.0;
    let t141 = t30 + t92 + t93;
    let t144 = t60 + t106 + t107;
    let t145 = t61 + t105 + t118;
    let t146 = t8 * t142 / 2.0;
    let t147 = t8 * t143 / 2.0;
    let t153 = t8 * (t69 - t111 + t48 * (t45 - t65)) * (-1.0 / 2.0);
    let t154 = t8 * (t70 - t128 + deltax2 * deltay2 * t13 * t28 * (t45 - t65)) * (-1.0 / 2.0);
    let t130 = -t125;
    let t140 = -t137;
    let t148 = -t146;
    let t151 = t71 + t122 + t133;
    let t152 = t72 + t116 + t135;
    let t157 = t67 + t99 + t119 + t147;
    let t155 = t8 * t151 / 2.0;
    let t156 = t8 * t152 / 2.0;
    let t158 = t68 + t104 + t110 + t148;
    let t160 = t81 + t130 + t139 + t156;

    let data: [f64; 48] = [
        t46,
        t34,
        t31,
        0.0,
        t70 * (-1.0 / 2.0) + t129 + t137 + t153,
        t84 + t131 + t136 - t155,
        t68 + t104 + t110 + t146,
        0.0,
        t8 * (t51 * (t79 - t123 + t8 * (t70 - t128 + deltax2 * deltay2 * t13 * t28 * (t45 - t65)) / 2.0 + t48 * (t45 - t65) / 2.0) + deltay3 * t20 * t26 * t144 - deltax3 * deltay3 * t14 * t29 * (t70 / 2.0 + t134 + t140 + t153)) * (-1.0 / 2.0) + t50 * (t70 / 2.0 + t134 + t140 + t153) / 2.0 - deltax3 * t20 * t26 * t144 / 2.0 - deltax3 * deltay3 * t14 * t29 * (t79 - t123 + t8 * (t70 - t128 + deltax2 * deltay2 * t13 * t28 * (t45 - t65)) / 2.0 + t48 * (t45 - t65) / 2.0) / 2.0,
        t50 * (t72 / 2.0 + t126 - t136 - t155) / 2.0 - t8 * (t51 * t160 + deltay3 * t20 * t26 * t145 - deltax3 * deltay3 * t14 * t29 * (t72 / 2.0 + t126 - t136 - t155)) / 2.0 - deltax3 * t20 * t26 * t145 / 2.0 - deltax3 * deltay3 * t14 * t29 * t160 / 2.0,
        t8 * (t51 * t157 + deltay3 * t20 * t26 * t141 - deltax3 * deltay3 * t14 * t29 * t158) / 2.0 - t50 * t158 / 2.0 + deltax3 * t20 * t26 * t141 / 2.0 + deltax3 * deltay3 * t14 * t29 * t157 / 2.0,
        0.0,
        t34,
        t47,
        t32,
        0.0,
        t79 - t123 + t154 + t48 * (t45 - t65) / 2.0,
        t81 + t130 + t139 - t156,
        -t67 - t99 + t113 + t147,
        0.0,
        t8 * (-t50 * (t70 / 2.0 + t134 + t140 + t153) + deltax3 * t20 * t26 * t144 + deltax3 * deltay3 * t14 * t29 * (t79 - t123 + t8 * (t70 - t128 + deltax2 * deltay2 * t13 * t28 * (t45 - t65)) / 2.0 + t48 * (t45 - t65) / 2.0)) / 2.0 - t51 * (t79 - t123 + t8 * (t70 - t128 + deltax2 * deltay2 * t13 * t28 * (t45 - t65)) / 2.0 + t48 * (t45 - t65) / 2.0) / 2.0 - deltay3 * t20 * t26 * t144 / 2.0 + deltax3 * deltay3 * t14 * t29 * (t70 / 2.0 + t134 + t140 + t153) / 2.0,
        t51 * t160 * (-1.0 / 2.0) + t8 * (-t50 * (t72 / 2.0 + t126 - t136 - t155) + deltax3 * t20 * t26 * t145 + deltax3 * deltay3 * t14 * t29 * t160) / 2.0 - deltay3 * t20 * t26 * t145 / 2.0 + deltax3 * deltay3 * t14 * t29 * (t72 / 2.0 + t126 - t136 - t155) / 2.0,
        t8 * (-t50 * t158 + deltax3 * t20 * t26 * t141 + deltax3 * deltay3 * t14 * t29 * t157) * (-1.0 / 2.0) + t51 * t157 / 2.0 + deltay3 * t20 * t26 * t141 / 2.0 - deltax3 * deltay3 * t14 * t29 * t158 / 2.0,
        0.0,
        -t31,
        -t32,
        t21,
        0.0,
        -t60 - t106 + deltax2 * t19 * t25 * (t45 - t65),
        -t61 - t105 + t108,
        t141,
        0.0,
        -t23 * t144 - deltax3 * t20 * t26 * (t70 / 2.0 + t134 + t140 + t153) + deltay3 * t20 * t26 * (t79 - t123 + t8 * (t70 - t128 + deltax2 * deltay2 * t13 * t28 * (t45 - t65)) / 2.0 + t48 * (t45 - t65) / 2.0),
        -t23 * t145 + deltay3 * t20 * t26 * t160 - deltax3 * t20 * t26 * (t72 / 2.0 + t126 - t136 - t155),
        t23 * t141 + deltax3 * t20 * t26 * t158 - deltay3 * t20 * t26 * t157,
        0.0,
        t35,
        t36,
        t33,
        1.0,
        t35 + t77 + t112 + t121,
        t36 + t78 + t115 + t124,
        t33 + t64 + t95 + t100,
        1.0,
        t35 + t77 + t112 + t121 - s3 * t20 * t26 * t144 - deltay3 * s3 * t14 * t29 * (t79 - t123 + t8 * (t70 - t128 + deltax2 * deltay2 * t13 * t28 * (t45 - t65)) / 2.0 + t48 * (t45 - t65) / 2.0) + deltax3 * s3 * t14 * t29 * (t70 / 2.0 + t134 + t140 + t153),
        t36 + t78 + t115 + t124 - s3 * t20 * t26 * t145 + deltax3 * s3 * t14 * t29 * (t72 / 2.0 + t126 - t136 - t155) - deltay3 * s3 * t14 * t29 * t160,
        t33 + t64 + t95 + t100 + s3 * t20 * t26 * t141 - deltax3 * s3 * t14 * t29 * t158 + deltay3 * s3 * t14 * t29 * t157,
        1.0,
    ];

    SMatrix::<f64, 12, 4>::from_column_slice(&data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const S: [f64; 3] = [0.456, 0.789, 0.123];
    const DX: [f64; 3] = [1.1, 1.2, 1.3];
    const DY: [f64; 3] = [2.1, 2.2, 2.3];

    #[test]
    fn test_first_block_is_single_section() {
        let m = real_robot_fk(&S, &DX, &DY);
        let single = BendVector::new(S[0], DX[0], DY[0]).pose().to_homogeneous();
        assert_relative_eq!(m.fixed_view::<4, 4>(0, 0).into_owned(), single, epsilon = 1e-12);
    }

    #[test]
    fn test_reference_rows() {
        let m = real_robot_fk(&S, &DX, &DY);
        assert_relative_eq!(m[(0, 3)], -0.15326975877166546, epsilon = 1e-12);

        let t2 = [0.20392547345487155, -0.9659827591919866, 0.15903367637089566, -0.3105160608278003];
        let t3 = [-0.08618554942479109, -0.968636612927772, -0.2330561373707211, -0.32402308884508163];
        for c in 0..4 {
            assert_relative_eq!(m[(4, c)], t2[c], epsilon = 1e-12);
            assert_relative_eq!(m[(8, c)], t3[c], epsilon = 1e-12);
        }
        for row in [3, 7, 11] {
            assert_eq!([m[(row, 0)], m[(row, 1)], m[(row, 2)], m[(row, 3)]], [0.0, 0.0, 0.0, 1.0]);
        }
    }

    #[test]
    fn test_matches_generic_composition() {
        let s = [0.1, 0.2, 0.3];
        let dx = [-0.4, 0.5, 0.05];
        let dy = [0.3, -0.2, 0.7];
        let sections = [0, 1, 2].map(|i| BendVector::new(s[i], dx[i], dy[i]));
        let expected = stack_homogeneous(&compose_sections(&sections));
        assert_relative_eq!(real_robot_fk(&s, &dx, &dy), expected, epsilon = 1e-12);
    }

    #[test]
    fn test_straight_section_falls_back() {
        let s = [0.1, 0.2, 0.3];
        let dx = [0.4, 0.0, 0.2];
        let dy = [0.1, 0.0, -0.3];
        let m = real_robot_fk(&s, &dx, &dy);
        assert!(m.iter().all(|v| v.is_finite()));

        // the straight middle section only translates along the first tip's z axis
        let t1 = m.fixed_view::<3, 4>(0, 0).into_owned();
        let t2 = m.fixed_view::<3, 4>(4, 0).into_owned();
        let expected = t1.column(3) + t1.column(2) * 0.2;
        assert_relative_eq!(t2.column(3).into_owned(), expected, epsilon = 1e-12);
    }
}
